use super::*;

#[derive(Clone)]
pub struct Thread {
    command_log: CommandLog,
    app: App,
}

impl Thread {
    async fn advance_once(&self) -> Result<bool> {
        // The application stream is this single loop: entries apply one
        // at a time, in index order, never concurrently.
        self.command_log
            .advance_apply_process(self.app.clone())
            .await
    }

    fn do_loop(self) -> ThreadHandle {
        let hdl = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                loop {
                    match self.advance_once().await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            // A committed entry is never skipped: keep
                            // retrying until it applies or the process
                            // is taken down.
                            error!("failed to apply a committed entry: {e}");
                            break;
                        }
                    }
                }
            }
        })
        .abort_handle();

        ThreadHandle(hdl)
    }
}

pub fn new(command_log: CommandLog, app: App) -> ThreadHandle {
    Thread { command_log, app }.do_loop()
}
