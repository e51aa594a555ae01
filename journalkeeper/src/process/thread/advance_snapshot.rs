use super::*;

#[derive(Clone)]
pub struct Thread {
    command_log: CommandLog,
}

impl Thread {
    async fn run_once(&self) -> Result<()> {
        self.command_log.advance_snapshot_index().await
    }

    fn do_loop(self, interval: Duration) -> ThreadHandle {
        let hdl = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                let fut = {
                    let this = self.clone();
                    async move { this.run_once().await }
                };
                let _ = defensive_panic_guard(fut).await;
            }
        })
        .abort_handle();
        ThreadHandle(hdl)
    }
}

pub fn new(command_log: CommandLog, interval: Duration) -> ThreadHandle {
    Thread { command_log }.do_loop(interval)
}
