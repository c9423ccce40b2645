use flagpoll::{Loop, Timeout};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Source {
    Wakeup,
    Completion,
}

fn source() -> impl Strategy<Value = Source> {
    prop_oneof![Just(Source::Wakeup), Just(Source::Completion)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever the timing between the producer and the blocked loop
    /// thread, every round's source is observed by a driver call.
    #[test]
    fn test_no_lost_wakeup(rounds in prop::collection::vec((source(), 0u64..400), 1..12)) {
        let mut event_loop = Loop::new().unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();
        let handle = event_loop.async_init(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let remote = event_loop.remote();

        for (round, (source, delay_us)) in rounds.into_iter().enumerate() {
            let handle = handle.clone();
            let remote = remote.clone();
            let delivered_by_post = delivered.clone();

            let producer = thread::spawn(move || {
                thread::sleep(Duration::from_micros(delay_us));
                match source {
                    Source::Wakeup => handle.send(),
                    Source::Completion => remote.post(move |_| {
                        delivered_by_post.fetch_add(1, Ordering::SeqCst);
                    }),
                }
            });

            event_loop.poll_io(Timeout::After(Duration::from_secs(5)));
            producer.join().unwrap();

            prop_assert_eq!(delivered.load(Ordering::SeqCst), round + 1);
        }

        event_loop.async_close(&handle);
    }

    /// Any number of concurrent senders between two cycles yields one run.
    #[test]
    fn test_sends_coalesce(senders in 1usize..6, sends in 1usize..200) {
        let mut event_loop = Loop::new().unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();
        let handle = event_loop.async_init(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..senders)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || (0..sends).for_each(|_| handle.send()))
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        event_loop.poll_io(Timeout::Immediate);
        event_loop.poll_io(Timeout::Immediate);

        prop_assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
