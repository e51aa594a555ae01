use anyhow::Result;
use jk_tests::*;
use journalkeeper::{Error, Roll};

#[tokio::test(flavor = "multi_thread")]
async fn disable_leader_write_window() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    cli.update_one(delta(1)).await?;
    cli.disable_leader_write(1_000).await?;

    // Inside the window updates fail fast.
    let err = cli.update_one(delta(1)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::LeaderWriteDisabled)
    ));

    // After the window they resume.
    tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
    cli.update_one(delta(1)).await?;

    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn membership_add_and_remove() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    let cli = cluster.client();
    cli.update_one(delta(5)).await?;

    // {A,B,C} -> {A,B,D}: add and remove at once goes through joint
    // consensus; the proposal commits with majorities in both sets.
    cluster.spawn_extra_node(3).await?;
    let old = vec![
        cluster.address(0),
        cluster.address(1),
        cluster.address(2),
    ];
    let new = vec![
        cluster.address(0),
        cluster.address(1),
        cluster.address(3),
    ];
    cli.update_voters(old, new).await?;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let info = cluster.client_to(0).get_servers().await?;
    assert_eq!(info.voters.len(), 3);
    assert!(info.voters.contains(&cluster.address(3)));
    assert!(!info.voters.contains(&cluster.address(2)));

    // Consensus still works in the new configuration with C gone.
    cluster.remove_node(2);
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let cli = cluster.client_to(0);
    cli.update_one(delta(1)).await?;
    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn observer_receives_but_never_votes() -> Result<()> {
    let mut cluster = Cluster::new(2).await?;
    let cli = cluster.client();

    // Make a third node an observer.
    cluster.spawn_extra_node(2).await?;
    cli.convert_roll(cluster.address(2), Roll::Observer).await?;

    cli.update_one(delta(9)).await?;

    // The observer applies the replicated entries...
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if cluster.app(2).value() == 9 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    // ...but stays outside the voter set.
    let info = cli.get_servers().await?;
    assert!(!info.voters.contains(&cluster.address(2)));
    assert!(info.observers.contains(&cluster.address(2)));
    Ok(())
}
