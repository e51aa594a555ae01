use anyhow::Result;
use jk_tests::*;
use journalkeeper::{Consistency, ResponseLevel, UpdateRequest};

#[tokio::test(flavor = "multi_thread")]
async fn n1_write_read() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    // Replication level resolves to null once a quorum (here: one node)
    // has the entry.
    let r = cli.update_one(delta(7)).await?;
    assert!(r.is_none());

    // All level returns the applied result: the previous counter value.
    let r = cli
        .update_one_with(UpdateRequest::new(delta(5)), false, ResponseLevel::All)
        .await?
        .unwrap();
    assert_eq!(parse_u64(&r), 7);

    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 12);

    cli.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n1_batch_results_in_order() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    let reqs = vec![
        UpdateRequest::new(delta(1)),
        UpdateRequest::new(delta(10)),
        UpdateRequest::new(delta(100)),
    ];
    let rs = cli.update(reqs, false, ResponseLevel::All).await?.unwrap();
    assert_eq!(rs.len(), 3);
    // One result per request, in submission order.
    assert_eq!(parse_u64(&rs[0]), 0);
    assert_eq!(parse_u64(&rs[1]), 1);
    assert_eq!(parse_u64(&rs[2]), 11);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n1_receive_and_persistence_return_null() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    for level in [ResponseLevel::Receive, ResponseLevel::Persistence] {
        let r = cli
            .update(vec![UpdateRequest::new(delta(1))], false, level)
            .await?;
        assert!(r.is_none());
    }

    // The entries still commit and apply.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let v = parse_u64(&cli.query(bytes::Bytes::new()).await?);
        if v == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n1_inline_header_is_split_off() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    cli.update_one(delta(2)).await?;

    // A payload that already carries its framing header: the journal
    // must split the header off instead of re-prepending one.
    let mut framed = bytes::BytesMut::new();
    framed.extend_from_slice(&3u32.to_be_bytes());
    framed.extend_from_slice(b"hdr");
    framed.extend_from_slice(&delta(5));

    let r = cli
        .update_one_with(
            UpdateRequest::new(framed.freeze()),
            true,
            ResponseLevel::All,
        )
        .await?
        .unwrap();
    // The state machine saw the bare delta, not the framed payload.
    assert_eq!(parse_u64(&r), 2);

    let v = cli.query(bytes::Bytes::new()).await?;
    assert_eq!(parse_u64(&v), 7);

    // The header rode the entry's metadata field.
    let headers = cluster.app(0).seen_headers();
    assert_eq!(
        headers,
        vec![None, Some(bytes::Bytes::from_static(b"hdr"))]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn n1_sequential_query() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    let cli = cluster.client();

    cli.update_one(delta(3)).await?;
    // A sequential read is served against the local applied state; give
    // the applier a beat.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let v = cli
        .query_with(bytes::Bytes::new(), Consistency::Sequential)
        .await?;
    assert_eq!(parse_u64(&v), 3);
    Ok(())
}
