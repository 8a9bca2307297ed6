use host_sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn many_readers_share_the_lock() {
    let l = RwLock::new(5_u32);

    let r1 = l.read();
    let r2 = l.read();
    assert_eq!(*r1 + *r2, 10);
    assert_eq!(l.reader_count(), 2);

    assert!(l.try_write().is_none());
    drop(r1);
    assert!(l.try_write().is_none());
    drop(r2);
    assert!(l.try_write().is_some());
}

#[test]
fn writer_excludes_readers() {
    let l = RwLock::new(Vec::<u8>::new());

    let mut w = l.write();
    w.push(1);
    assert!(l.is_write_locked());
    assert!(l.try_read().is_none());
    assert!(l.try_write().is_none());
    drop(w);

    assert!(!l.is_write_locked());
    assert_eq!(l.read().as_slice(), &[1]);
}

#[test]
fn closures_release_the_lock() {
    let l = RwLock::new(String::from("x"));
    l.with_write(|s| s.push('y'));
    let len = l.with_read(String::len);
    assert_eq!(len, 2);
    assert!(l.try_write().is_some());
}

#[test]
fn waiting_writer_holds_off_new_readers() {
    let lock = RwLock::new(0_u32);
    let reader = lock.read();

    thread::scope(|s| {
        let writer = s.spawn(|| {
            *lock.write() += 1;
        });

        // once the writer is waiting, fresh readers back off
        while let Some(extra) = lock.try_read() {
            drop(extra);
            thread::yield_now();
        }
        assert_eq!(lock.reader_count(), 1);

        drop(reader);
        writer.join().unwrap();
    });

    assert_eq!(*lock.read(), 1);
    assert!(!lock.is_write_locked());
}

#[test]
fn readers_and_writers_under_contention() {
    let threads = 6;
    let iters = 2_000;

    let lock = Arc::new(RwLock::new((0usize, 0usize)));
    let writers_inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let writers_inside = Arc::clone(&writers_inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    if i % 2 == 0 {
                        let mut g = lock.write();
                        assert_eq!(writers_inside.fetch_add(1, Ordering::SeqCst), 0);
                        g.0 += 1;
                        g.1 += 1;
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let g = lock.read();
                        assert_eq!(writers_inside.load(Ordering::SeqCst), 0);
                        assert_eq!(g.0, g.1);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let g = lock.read();
    assert_eq!(g.0, (threads / 2) * iters);
}

#[test]
fn rw_lock_is_sync() {
    fn assert_sync<T: Sync>() {}
    assert_sync::<RwLock<u64>>();
}
