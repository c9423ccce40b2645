use flagpoll::{ErrorKind, Events, Loop, LoopBuilder, LoopError, Timeout};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");

    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

fn write_byte(fd: &OwnedFd) {
    let n = unsafe { libc::write(fd.as_raw_fd(), [1u8].as_ptr().cast(), 1) };
    assert_eq!(n, 1, "write failed");
}

fn recorder() -> (Rc<RefCell<Vec<RawFd>>>, impl Fn() -> Vec<RawFd>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let view = log.clone();

    (log, move || view.borrow().clone())
}

#[test]
fn test_dispatches_only_ready_watchers() {
    let (a_rx, a_tx) = pipe();
    let (b_rx, b_tx) = pipe();
    let (c_rx, _c_tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let (log, seen) = recorder();

    let masks = [
        (a_rx.as_raw_fd(), Events::READABLE),
        (b_rx.as_raw_fd(), Events::READABLE | Events::PRIORITY),
        (c_rx.as_raw_fd(), Events::READABLE | Events::WRITABLE),
    ];

    for (fd, events) in masks {
        let log = log.clone();
        event_loop.io_start(fd, events, move |_, fd, events| {
            assert!(events.contains(Events::READABLE));
            log.borrow_mut().push(fd);
        });
    }

    write_byte(&a_tx);
    write_byte(&b_tx);

    event_loop.poll_io(Timeout::Infinite);

    let mut dispatched = seen();
    dispatched.sort();

    let mut expected = vec![a_rx.as_raw_fd(), b_rx.as_raw_fd()];
    expected.sort();

    assert_eq!(dispatched, expected);
    assert_eq!(event_loop.watched_fds(), 3);
    assert_eq!(event_loop.metrics().events, 2);
}

#[test]
fn test_zero_timeout_returns_immediately() {
    let (rx, _tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let (log, seen) = recorder();

    event_loop.io_start(rx.as_raw_fd(), Events::READABLE, move |_, fd, _| {
        log.borrow_mut().push(fd);
    });

    let start = Instant::now();
    event_loop.poll_io(Timeout::Immediate);

    assert!(start.elapsed() < Duration::from_millis(200));
    assert!(seen().is_empty(), "Nothing was ready");
}

#[test]
fn test_zero_timeout_without_watchers() {
    let mut event_loop = Loop::new().unwrap();

    let start = Instant::now();
    event_loop.poll_io(Timeout::Immediate);

    assert!(start.elapsed() < Duration::from_millis(200));
    assert!(!event_loop.is_poll_thread_running());
    assert_eq!(event_loop.metrics().events, 0);
}

#[test]
fn test_finite_timeout_elapses() {
    let (rx, _tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let (log, seen) = recorder();

    event_loop.io_start(rx.as_raw_fd(), Events::READABLE, move |_, fd, _| {
        log.borrow_mut().push(fd);
    });

    let before = event_loop.now();
    let start = Instant::now();
    event_loop.poll_io(Timeout::After(Duration::from_millis(50)));
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(50), "Returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "Returned late: {elapsed:?}");
    assert!(seen().is_empty());
    assert!(event_loop.now() >= before + 50);
}

#[test]
fn test_finite_timeout_after_idle_period() {
    let mut event_loop = Loop::new().unwrap();

    // The cached loop time goes stale while nobody drives the loop.
    thread::sleep(Duration::from_millis(200));

    // Escalates, then dispatches nothing once the driver wakes.
    let handle = event_loop.async_init(|_, _| {});
    handle.send();
    event_loop.async_close(&handle);

    let start = Instant::now();
    event_loop.poll_io(Timeout::After(Duration::from_millis(100)));
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "Returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "Returned late: {elapsed:?}");
    assert_eq!(event_loop.metrics().events, 0);
}

#[test]
fn test_hangup_is_reported() {
    let (rx, tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let reported = Rc::new(RefCell::new(Events::empty()));
    let sink = reported.clone();

    event_loop.io_start(rx.as_raw_fd(), Events::READABLE, move |_, _, events| {
        *sink.borrow_mut() = events;
    });

    drop(tx);
    event_loop.poll_io(Timeout::After(Duration::from_secs(5)));

    assert!(reported.borrow().contains(Events::HANGUP));
}

#[test]
fn test_watcher_added_while_helper_polls() {
    let (a_rx, _a_tx) = pipe();
    let (b_rx, b_tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let (log, seen) = recorder();

    let first = log.clone();
    event_loop.io_start(a_rx.as_raw_fd(), Events::READABLE, move |_, fd, _| {
        first.borrow_mut().push(fd);
    });

    // Leaves the helper blocked inside poll(2) over `a`.
    event_loop.poll_io(Timeout::After(Duration::from_millis(20)));
    assert!(event_loop.is_poll_thread_running());

    event_loop.io_start(b_rx.as_raw_fd(), Events::READABLE, move |_, fd, _| {
        log.borrow_mut().push(fd);
    });

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        write_byte(&b_tx);
        b_tx
    });

    event_loop.poll_io(Timeout::After(Duration::from_secs(5)));
    let _b_tx = writer.join().unwrap();

    assert_eq!(seen(), vec![b_rx.as_raw_fd()]);
    assert_eq!(event_loop.watched_fds(), 2);
}

#[test]
fn test_signal_watcher_runs_last() {
    let (sig_rx, sig_tx) = pipe();
    let (io_rx, io_tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let signal_order = order.clone();
    event_loop.signal_io_start(sig_rx.as_raw_fd(), move |_, _, events| {
        assert_eq!(events, Events::READABLE);
        signal_order.borrow_mut().push("signal");
    });

    let io_order = order.clone();
    event_loop.io_start(io_rx.as_raw_fd(), Events::READABLE, move |_, _, _| {
        io_order.borrow_mut().push("io");
    });

    write_byte(&sig_tx);
    write_byte(&io_tx);

    event_loop.poll_io(Timeout::Infinite);

    assert_eq!(*order.borrow(), vec!["io", "signal"]);
}

#[test]
fn test_stop_from_callback_skips_other_watcher() {
    let (a_rx, a_tx) = pipe();
    let (b_rx, b_tx) = pipe();

    let a = a_rx.as_raw_fd();
    let b = b_rx.as_raw_fd();

    let mut event_loop = Loop::new().unwrap();
    let (log, seen) = recorder();

    let a_log = log.clone();
    event_loop.io_start(a, Events::READABLE, move |l, fd, _| {
        a_log.borrow_mut().push(fd);
        l.io_stop(b, Events::READABLE);
    });

    event_loop.io_start(b, Events::READABLE, move |l, fd, _| {
        log.borrow_mut().push(fd);
        l.io_stop(a, Events::READABLE);
    });

    write_byte(&a_tx);
    write_byte(&b_tx);

    event_loop.poll_io(Timeout::Infinite);

    let dispatched = seen();
    assert_eq!(dispatched.len(), 1, "Only the first visited watcher runs");

    let survivor = dispatched[0];
    assert!(event_loop.is_watching(survivor));
    assert!(!event_loop.is_watching(if survivor == a { b } else { a }));
    assert_eq!(event_loop.watched_fds(), 1);
}

#[test]
fn test_stop_one_of_two_interests_keeps_watcher() {
    let (rx, _tx) = pipe();
    let fd = rx.as_raw_fd();

    let mut event_loop = Loop::new().unwrap();
    event_loop.io_start(fd, Events::READABLE | Events::PRIORITY, |_, _, _| {});
    event_loop.poll_io(Timeout::Immediate);

    event_loop.io_stop(fd, Events::PRIORITY);
    assert!(event_loop.is_watching(fd));

    event_loop.io_close(fd);
    assert!(!event_loop.is_watching(fd));
    assert_eq!(event_loop.watched_fds(), 0);
}

#[test]
fn test_restart_replaces_callback() {
    let (rx, tx) = pipe();
    let fd = rx.as_raw_fd();

    let mut event_loop = Loop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let old = order.clone();
    event_loop.io_start(fd, Events::READABLE, move |_, _, _| old.borrow_mut().push("old"));

    let new = order.clone();
    event_loop.io_start(fd, Events::READABLE, move |_, _, _| new.borrow_mut().push("new"));

    write_byte(&tx);
    event_loop.poll_io(Timeout::Infinite);

    assert_eq!(*order.borrow(), vec!["new"]);
    assert_eq!(event_loop.watched_fds(), 1);
}

#[test]
fn test_restart_installed_watcher_with_same_mask() {
    let (rx, tx) = pipe();
    let fd = rx.as_raw_fd();

    let mut event_loop = Loop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let old = order.clone();
    event_loop.io_start(fd, Events::READABLE, move |_, _, _| old.borrow_mut().push("old"));
    event_loop.poll_io(Timeout::After(Duration::from_millis(10)));

    let new = order.clone();
    event_loop.io_start(fd, Events::READABLE, move |_, _, _| new.borrow_mut().push("new"));

    write_byte(&tx);
    event_loop.poll_io(Timeout::After(Duration::from_secs(5)));

    assert_eq!(*order.borrow(), vec!["new"]);
    assert_eq!(event_loop.watched_fds(), 1);
}

#[test]
fn test_fd_set_grows_past_initial_capacity() {
    let pipes: Vec<_> = (0..6).map(|_| pipe()).collect();

    let mut event_loop = LoopBuilder::new().fd_capacity(2).build().unwrap();
    let (log, seen) = recorder();

    for (rx, tx) in &pipes {
        let log = log.clone();
        event_loop.io_start(rx.as_raw_fd(), Events::READABLE, move |_, fd, _| {
            log.borrow_mut().push(fd);
        });
        write_byte(tx);
    }

    event_loop.poll_io(Timeout::Infinite);

    let mut dispatched = seen();
    dispatched.sort();

    let mut expected: Vec<_> = pipes.iter().map(|(rx, _)| rx.as_raw_fd()).collect();
    expected.sort();

    assert_eq!(dispatched, expected);
    assert_eq!(event_loop.watched_fds(), pipes.len());
}

#[test]
fn test_check_fd() {
    let event_loop = Loop::new().unwrap();

    let (rx, _tx) = pipe();
    assert!(event_loop.check_fd(rx.as_raw_fd()).is_ok());

    // Far above anything the other tests open concurrently.
    let stale: RawFd = 999_999;

    let error = event_loop.check_fd(stale).unwrap_err();
    assert!(matches!(error, LoopError::InvalidFd(fd) if fd == stale));
    assert_eq!(error.kind(), ErrorKind::Invalid);
}

#[test]
#[should_panic(expected = "fd must be >= 0")]
fn test_negative_fd_panics() {
    let mut event_loop = Loop::new().unwrap();
    event_loop.io_start(-1, Events::READABLE, |_, _, _| {});
}

#[test]
#[should_panic(expected = "events must not be empty")]
fn test_empty_interest_panics() {
    let (rx, _tx) = pipe();

    let mut event_loop = Loop::new().unwrap();
    event_loop.io_start(rx.as_raw_fd(), Events::empty(), |_, _, _| {});
}

#[test]
fn test_idle_time_accounting() {
    let mut event_loop = LoopBuilder::new().metrics_idle_time(true).build().unwrap();
    event_loop.poll_io(Timeout::After(Duration::from_millis(30)));

    let metrics = event_loop.metrics();
    assert!(metrics.idle_time >= Duration::from_millis(25), "{metrics:?}");
    assert_eq!(metrics.events, 0);

    let mut quiet = Loop::new().unwrap();
    quiet.poll_io(Timeout::After(Duration::from_millis(10)));
    assert_eq!(quiet.metrics().idle_time, Duration::ZERO);
}
