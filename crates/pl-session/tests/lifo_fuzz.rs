use pl_session::SessionConfig;
use quickcheck::{QuickCheck, TestResult};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::RecordingClient;

// Frames are pushed in order, and then popped by threads which start in
// an arbitrary order. Frames must be released innermost-first regardless.
fn lifo_under_interleaving(order: Vec<u8>) -> TestResult {
    if order.is_empty() {
        return TestResult::discard();
    }
    let order: Vec<usize> = order.into_iter().take(8).map(usize::from).collect();
    let n = order.len();

    let client = Arc::new(RecordingClient::default());
    let session = common::session(SessionConfig::default());

    let frames: Vec<_> = (0..n)
        .map(|i| {
            let frame = session
                .create_and_push_stack(&common::worker(i as u64, &client))
                .unwrap();
            frame.add_query_handler(i as i32);
            frame
        })
        .collect();

    // Derive a permutation of frames from the arbitrary input.
    let mut permutation: Vec<usize> = (0..n).collect();
    for (i, pick) in order.iter().enumerate() {
        permutation.swap(i, i + pick % (n - i));
    }

    let handles: Vec<_> = permutation
        .into_iter()
        .enumerate()
        .map(|(delay, index)| {
            let session = session.clone();
            let stack_id = frames[index].id();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_micros(50 * delay as u64));
                session.pop_and_destroy_stack(stack_id);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let freed = client.freed.lock().unwrap().clone();
    let expect: Vec<i32> = (0..n as i32).rev().collect();

    TestResult::from_bool(
        freed == expect && session.depth() == 0 && !session.is_running(),
    )
}

#[test]
fn fuzz_lifo_destruction() {
    QuickCheck::new()
        .tests(50)
        .quickcheck(lifo_under_interleaving as fn(Vec<u8>) -> TestResult);
}
