use anyhow::Result;
use jk_tests::*;

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_catches_up_through_snapshot() -> Result<()> {
    let mut cluster = Cluster::new(1).await?;
    let cli = cluster.client_to(0);

    for i in 1..=20u64 {
        cli.update_one(delta(i)).await?;
    }

    // Snapshot the applied state; the boundary advances and old journal
    // segments become eligible for compaction.
    cluster.app(0).snapshot_now();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    // A fresh voter starts from nothing and must be fed the snapshot.
    cluster.spawn_extra_node(1).await?;
    cli.update_voters(
        vec![cluster.address(0)],
        vec![cluster.address(0), cluster.address(1)],
    )
    .await?;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        if cluster.app(1).value() == 210 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn state_survives_restart() -> Result<()> {
    let mut cluster = Cluster::builder().with_persistency(true).build(1).await?;
    {
        let cli = cluster.client_to(0);
        for i in 1..=5u64 {
            cli.update_one(delta(i)).await?;
        }
        let v = cli.query(bytes::Bytes::new()).await?;
        assert_eq!(parse_u64(&v), 15);
    }

    cluster.restart_node(0).await?;

    let cli = cluster.client_to(0);
    cli.wait_for_cluster_ready(std::time::Duration::from_secs(10))
        .await?;
    // The journal replays into the state machine after restart.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let v = parse_u64(&cli.query(bytes::Bytes::new()).await?);
        if v == 15 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Ok(())
}
