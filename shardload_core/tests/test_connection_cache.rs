use std::sync::Arc;

use common::{Event, MockTransport, NodeScript, count, events, identity, new_log};
use shardload_core::{ChannelState, ConnectionCache, Result};
use shardload_resources::{ChannelIdentity, NodeId, Principal};

mod common;

fn cache(transport: MockTransport) -> ConnectionCache {
    ConnectionCache::new(Arc::new(transport), "COPY public.metrics FROM STDIN", false)
}

#[test]
fn test_same_identity_same_channel() -> Result<()> {
    let log = new_log();
    let mut cache = cache(MockTransport::new(log.clone()));

    cache.get_for_upload(&identity("a"))?.put(b"1\n")?;
    cache.get_for_upload(&identity("a"))?.put(b"2\n")?;

    assert_eq!(cache.len(), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::Open(_))), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::Begin { .. })), 1);
    assert_eq!(cache.active().count(), 1);
    Ok(())
}

#[test]
fn test_principal_is_part_of_identity() -> Result<()> {
    let log = new_log();
    let mut cache = cache(MockTransport::new(log.clone()));

    cache.get(&identity("a"))?;
    cache.get(&ChannelIdentity::new(NodeId::new("a"), Principal::new("other")))?;

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&identity("a"))?.state(), ChannelState::Idle);
    assert!(!cache.has_active());
    Ok(())
}

#[test]
fn test_channels_closed_once_on_drop() -> Result<()> {
    let log = new_log();
    let mut cache = cache(MockTransport::new(log.clone()));

    cache.get_for_upload(&identity("a"))?;
    cache.get(&identity("b"))?;
    drop(cache);

    assert_eq!(count(&log, |e| *e == Event::Close("a".to_string())), 1);
    assert_eq!(count(&log, |e| *e == Event::Close("b".to_string())), 1);
    Ok(())
}

#[test]
fn test_connect_failure_is_not_cached() {
    let log = new_log();
    let transport = MockTransport::new(log.clone()).with_script(
        "a",
        NodeScript {
            refuse_connect: true,
            ..Default::default()
        },
    );
    let mut cache = cache(transport);

    let err = cache.get_for_upload(&identity("a")).unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("during connect"));
    assert!(cache.is_empty());
    assert!(events(&log).is_empty());
}
