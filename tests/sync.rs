//! Lock and Event conformance: fast paths, FIFO hand-off, cancellation
//! of a reserved waiter, and the mutual-exclusion property under
//! arbitrary interleavings.

mod common;

use common::virtual_rt;
use microloop::{Event, Lock};
use proptest::prelude::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn event_already_set_completes_without_suspension() {
    let rt = virtual_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let event = Event::new(&rt2);
            event.set();
            let before = rt2.steps();
            assert!(event.wait().await?);
            assert_eq!(rt2.steps(), before);
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn event_set_wakes_every_waiter_and_stays_set() {
    let rt = virtual_rt();
    let woken = Rc::new(Cell::new(0u32));
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        let woken = woken.clone();
        rt.run_until_complete(async move {
            let event = Event::new(&rt2);
            let mut handles = Vec::new();
            for _ in 0..3 {
                let event = event.clone();
                let woken = woken.clone();
                handles.push(rt2.create_task(async move {
                    event.wait().await?;
                    woken.set(woken.get() + 1);
                    Ok(())
                }));
            }
            rt2.sleep_ms(0).await?;
            assert_eq!(woken.get(), 0);
            event.set();
            for h in handles {
                h.await?;
            }
            assert_eq!(woken.get(), 3);
            // Late waiters never block once set.
            assert!(event.is_set());
            assert!(event.wait().await?);
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn event_clear_blocks_new_waiters_only() {
    let rt = virtual_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let event = Event::new(&rt2);
            event.set();
            event.clear();
            assert!(!event.is_set());

            let waiter = {
                let event = event.clone();
                rt2.create_task(async move { event.wait().await })
            };
            rt2.sleep_ms(0).await?;
            assert!(!waiter.is_done());
            event.set();
            assert!(waiter.await?);
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn lock_fast_path_does_not_suspend() {
    let rt = virtual_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let lock = Lock::new(&rt2);
            let before = rt2.steps();
            let guard = lock.acquire().await?;
            assert_eq!(rt2.steps(), before);
            assert!(lock.locked());
            drop(guard);
            assert!(!lock.locked());
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn contended_acquire_hands_off_without_an_unlocked_window() {
    let rt = virtual_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let lock = Lock::new(&rt2);
            let guard = lock.acquire().await?;

            let second = {
                let lock = lock.clone();
                rt2.create_task(async move {
                    let guard = lock.acquire().await?;
                    assert!(lock.locked());
                    drop(guard);
                    Ok(())
                })
            };
            // The second task suspends on the held lock.
            rt2.sleep_ms(0).await?;
            assert!(!second.is_done());
            assert!(lock.locked());

            // Releasing reserves the lock for the waiter; it is never
            // observable as unlocked in between.
            drop(guard);
            assert!(lock.locked());
            second.await?;
            assert!(!lock.locked());
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
#[should_panic(expected = "lock not acquired")]
fn release_without_acquire_panics() {
    let rt = virtual_rt();
    let lock = Lock::new(&rt);
    lock.release();
}

#[test]
fn cancelled_reserved_waiter_passes_the_lock_on() {
    let rt = virtual_rt();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        let log = log.clone();
        rt.run_until_complete(async move {
            let lock = Lock::new(&rt2);
            let guard = lock.acquire().await?;

            // Ready tasks run most-recently-spawned first, so the
            // doomed waiter (spawned second) enters the FIFO first.
            let patient = {
                let lock = lock.clone();
                let log = log.clone();
                rt2.create_task(async move {
                    let _guard = lock.acquire().await?;
                    log.borrow_mut().push("patient acquired");
                    Ok(())
                })
            };
            let doomed = {
                let lock = lock.clone();
                let log = log.clone();
                rt2.create_task(async move {
                    match lock.acquire().await {
                        Err(err) => {
                            assert!(err.is_cancelled());
                            log.borrow_mut().push("doomed cancelled");
                            Err::<(), _>(err)
                        }
                        Ok(_) => panic!("doomed waiter acquired the lock"),
                    }
                })
            };

            rt2.sleep_ms(0).await?;
            // Hand the lock to the doomed waiter, then cancel it before
            // it can confirm the reservation.
            drop(guard);
            assert!(lock.locked());
            assert!(doomed.cancel());
            assert!(lock.locked());

            let _ = doomed.await;
            patient.await?;
            assert!(!lock.locked());
            Ok(())
        })
    };
    result.unwrap();
    assert_eq!(*log.borrow(), vec!["doomed cancelled", "patient acquired"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any interleaving of N tasks doing acquire/release with
    /// arbitrary hold times, at most one task holds the lock at a time.
    #[test]
    fn lock_is_mutually_exclusive(holds in proptest::collection::vec(0..4i32, 2..6)) {
        let rt = virtual_rt();
        let tasks = holds.len();
        let inside = Rc::new(Cell::new(0u32));
        let entered = Rc::new(Cell::new(0u32));
        let overlapped = Rc::new(Cell::new(false));

        let result: microloop::Result<()> = {
            let rt2 = rt.clone();
            let inside = inside.clone();
            let entered = entered.clone();
            let overlapped = overlapped.clone();
            rt.run_until_complete(async move {
                let lock = Lock::new(&rt2);
                let mut handles = Vec::new();
                for hold in holds {
                    let rt = rt2.clone();
                    let lock = lock.clone();
                    let inside = inside.clone();
                    let entered = entered.clone();
                    let overlapped = overlapped.clone();
                    handles.push(rt2.create_task(async move {
                        let _guard = lock.acquire().await?;
                        entered.set(entered.get() + 1);
                        inside.set(inside.get() + 1);
                        if inside.get() > 1 {
                            overlapped.set(true);
                        }
                        // Suspend while holding, so other tasks get a
                        // chance to contend.
                        rt.sleep_ms(hold).await?;
                        inside.set(inside.get() - 1);
                        Ok(())
                    }));
                }
                for h in handles {
                    h.await?;
                }
                Ok(())
            })
        };
        result.unwrap();
        prop_assert!(!overlapped.get());
        prop_assert_eq!(entered.get() as usize, tasks);
        prop_assert_eq!(inside.get(), 0);
    }
}
