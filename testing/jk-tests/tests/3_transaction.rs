use anyhow::Result;
use jk_tests::*;
use journalkeeper::UpdateRequest;

#[tokio::test(flavor = "multi_thread")]
async fn transaction_commit_is_atomic() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    let cli = cluster.client();
    cli.wait_for_cluster_ready(std::time::Duration::from_secs(10))
        .await?;

    let tx = cli.begin_transaction().await?;
    assert!(cli.opening_transactions().await?.contains(&tx));

    cli.update_in(tx, vec![UpdateRequest::new(delta(1))], false)
        .await?;
    cli.update_in(
        tx,
        vec![
            UpdateRequest::new(delta(10)),
            UpdateRequest::new(delta(100)),
        ],
        false,
    )
    .await?;

    // Nothing is visible before commit.
    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 0);

    cli.commit_transaction(tx).await?;

    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 111);
    assert!(cli.opening_transactions().await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_rollback_discards() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    let tx = cli.begin_transaction().await?;
    cli.update_in(tx, vec![UpdateRequest::new(delta(42))], false)
        .await?;
    cli.rollback_transaction(tx).await?;

    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 0);
    assert!(cli.opening_transactions().await?.is_empty());
    Ok(())
}
