use pl_session::{
    Error, ExecutionContext, InterruptReason, SessionConfig, SessionRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::RecordingClient;

#[test]
fn test_out_of_order_pop_blocks_until_topmost() {
    let client = Arc::new(RecordingClient::default());
    let session = common::session(SessionConfig::default());

    let a = session
        .create_and_push_stack(&common::worker(1, &client))
        .unwrap();
    assert_eq!(session.depth(), 1);
    let b = session
        .create_and_push_stack(&common::worker(2, &client))
        .unwrap();
    assert_eq!(session.depth(), 2);

    let popped_a = Arc::new(AtomicBool::new(false));
    let handle = {
        let (session, popped_a, a_id) = (session.clone(), popped_a.clone(), a.id());
        std::thread::spawn(move || {
            session.pop_and_destroy_stack(a_id);
            popped_a.store(true, Ordering::SeqCst);
        })
    };

    // A is not topmost, so its pop waits.
    std::thread::sleep(Duration::from_millis(100));
    assert!(!popped_a.load(Ordering::SeqCst));
    assert_eq!(session.depth(), 2);
    assert_eq!(session.top_stack().unwrap().id(), b.id());

    session.pop_and_destroy_stack(b.id());
    handle.join().unwrap();

    assert!(popped_a.load(Ordering::SeqCst));
    assert_eq!(session.depth(), 0);
    assert!(!session.is_running());
    assert!(!session.is_interrupted());
    assert!(session.top_stack().is_none());
}

#[test]
fn test_interrupt_refuses_nested_work_until_drained() {
    let client = Arc::new(RecordingClient::default());
    let session = common::session(SessionConfig::default());

    let active = session
        .create_and_push_stack(&common::worker(1, &client))
        .unwrap();
    assert!(session.set_interrupt(InterruptReason::OutOfMemory, "alloc failed"));

    let err = session
        .create_and_push_stack(&common::worker(2, &client))
        .unwrap_err();
    let Error::Interrupted(interrupt) = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(interrupt.reason, InterruptReason::OutOfMemory);
    assert_eq!(interrupt.message, "alloc failed");
    assert_eq!(session.depth(), 1);

    session.pop_and_destroy_stack(active.id());
    assert!(!session.is_interrupted());

    let fresh = session
        .create_and_push_stack(&common::worker(2, &client))
        .unwrap();
    assert_eq!(session.depth(), 1);
    session.pop_and_destroy_stack(fresh.id());
}

#[test]
fn test_drained_session_accepts_new_work() {
    let client = Arc::new(RecordingClient::default());
    let session = common::session(SessionConfig {
        max_nesting_depth: 0,
        ..Default::default()
    });
    let worker = common::worker(1, &client);

    let outer = session.create_and_push_stack(&worker).unwrap();
    assert!(matches!(
        session.create_and_push_stack(&worker),
        Err(Error::TooManyNestedCalls)
    ));
    // Further nested work observes the interrupt.
    let err = session.create_and_push_stack(&worker).unwrap_err();
    assert_eq!(err.code(), InterruptReason::TooManyNestedCalls.code());

    session.pop_and_destroy_stack(outer.id());
    assert!(!session.is_interrupted());
    let again = session.create_and_push_stack(&worker).unwrap();
    session.pop_and_destroy_stack(again.id());
}

#[test]
fn test_wait_for_interrupt_returns_once_drained() {
    let client = Arc::new(RecordingClient::default());
    let session = common::session(SessionConfig::default());
    let frame = session
        .create_and_push_stack(&common::worker(1, &client))
        .unwrap();

    assert!(!session.wait_for_interrupt_timeout(Duration::from_millis(20)));

    let worker = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            session.pop_and_destroy_stack(frame.id());
        })
    };
    session.wait_for_interrupt();
    assert!(!session.is_running());
    worker.join().unwrap();

    // Returns immediately when not running.
    session.wait_for_interrupt();
    assert!(session.wait_for_interrupt_timeout(Duration::ZERO));
}

#[test]
fn test_execution_context_and_registry() {
    let client = Arc::new(RecordingClient::default());
    let registry = SessionRegistry::new(SessionConfig::default(), common::services());
    let ctx = ExecutionContext::new(registry.clone(), common::worker(1, &client), 42);

    assert!(matches!(ctx.session(), Err(Error::SessionExpired)));

    {
        let outer = ctx.enter().unwrap();
        outer.add_query_handler(7);
        let inner = ctx.enter().unwrap();
        inner.add_query_handler(8);

        let session = ctx.session().unwrap();
        assert_eq!(session.depth(), 2);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.interrupt_all(InterruptReason::ServerShutdown, ""), 1);
        assert_eq!(registry.interrupt_all(InterruptReason::ServerShutdown, ""), 0);
        assert!(ctx.enter().is_err());
        // Guards drop in reverse order, popping inner then outer.
    }

    assert_eq!(*client.freed.lock().unwrap(), vec![8, 7]);
    let session = ctx.session().unwrap();
    assert_eq!(session.depth(), 0);
    assert!(!session.is_interrupted());

    assert!(registry.remove(42).is_some());
    assert!(registry.is_empty());
    assert!(matches!(ctx.session(), Err(Error::SessionExpired)));
}
