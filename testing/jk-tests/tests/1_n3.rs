use anyhow::Result;
use jk_tests::*;
use journalkeeper::{ResponseLevel, UpdateRequest};

#[tokio::test(flavor = "multi_thread")]
async fn n3_cluster_forms() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    let cli = cluster.client();
    cli.wait_for_cluster_ready(std::time::Duration::from_secs(10))
        .await?;
    let info = cli.get_servers().await?;
    assert!(info.leader.is_some());
    assert_eq!(info.voters.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n3_write_from_any_node() -> Result<()> {
    let cluster = Cluster::new(3).await?;

    // Routing through any endpoint lands on the leader via redirects.
    let mut expected = 0u64;
    for i in 0..30u64 {
        let io_node = (i % 3) as u8;
        let cli = cluster.client_to(io_node);
        let old = cli
            .update_one_with(
                UpdateRequest::new(delta(i)),
                false,
                ResponseLevel::All,
            )
            .await?
            .unwrap();
        assert_eq!(parse_u64(&old), expected);
        expected += i;
    }

    let v = cluster.client().query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n3_parallel_writes() -> Result<()> {
    const N: u64 = 30;

    let cluster = Cluster::new(3).await?;

    let mut futs = vec![];
    for _ in 0..N {
        let cli = cluster.client();
        futs.push(async move { cli.update_one(delta(1)).await });
    }
    futures::future::try_join_all(futs).await?;

    let v = cluster.client().query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), N);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n3_leader_failover() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    let cli = cluster.client();

    cli.update_one(delta(1)).await?;

    // Down the leader. Clients previously talking to it get redirected
    // to the winner of the next election.
    let leader = cli.get_servers().await?.leader.unwrap();
    let leader_id = (0..3u8)
        .find(|id| cluster.address(*id) == leader)
        .unwrap();
    cluster.remove_node(leader_id);
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    cli.update_one(delta(2)).await?;
    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n3_all_nodes_apply() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    let cli = cluster.client();

    for i in 1..=10u64 {
        cli.update_one(delta(i)).await?;
    }

    // lastApplied eventually reaches the write on every node.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    'outer: loop {
        let mut done = true;
        for id in 0..3 {
            if cluster.app(id).value() != 55 {
                done = false;
            }
        }
        if done {
            break 'outer;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Ok(())
}
