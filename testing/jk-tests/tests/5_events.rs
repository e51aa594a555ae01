use anyhow::Result;
use jk_tests::*;
use journalkeeper::ClusterEvent;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread")]
async fn watch_observes_cluster_events() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    let seen: Arc<spin::Mutex<Vec<ClusterEvent>>> = Arc::new(spin::Mutex::new(vec![]));
    let sink = seen.clone();
    let handle = cli.watch(move |ev| {
        sink.lock().push(ev.clone());
    });

    cli.disable_leader_write(200).await?;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let got_gate = seen
            .lock()
            .iter()
            .any(|ev| matches!(ev, ClusterEvent::WriteGateChanged { disabled: true }));
        if got_gate {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    // The bootstrap also produced leader and configuration events.
    {
        let seen = seen.lock();
        assert!(seen
            .iter()
            .any(|ev| matches!(ev, ClusterEvent::LeaderChanged { leader: Some(_), .. })));
        assert!(seen
            .iter()
            .any(|ev| matches!(ev, ClusterEvent::ConfigurationChanged { .. })));
    }

    cli.unwatch(handle);
    cli.stop();
    Ok(())
}
