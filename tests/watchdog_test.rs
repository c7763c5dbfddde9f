use async_trait::async_trait;
use hestia::plugin::{Config, Context, IntSetter, Plugin, Registry, Setter, setter_fn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Setter failing if two invocations ever overlap
#[derive(Clone, Default)]
struct Guarded {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl IntSetter for Guarded {
    async fn int_setter(&self, _param: &str) -> hestia::Result<Setter<i64>> {
        let g = self.clone();
        Ok(setter_fn(move |v: i64| {
            let g = g.clone();
            async move {
                if g
                    .busy
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    g.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                g.writes.lock().unwrap().push(v);
                g.busy.store(false, Ordering::SeqCst);
                Ok(())
            }
        }))
    }
}

hestia::impl_plugin!(Guarded, IntSetter);

async fn watchdog(target: &Guarded, timeout: &str) -> Setter<i64> {
    let mut r = Registry::builtin().unwrap();
    let target = target.clone();
    r.add("guarded", move |_| Ok(Box::new(target.clone()) as Box<dyn Plugin>))
        .unwrap();
    let ctx = Context::new(Arc::new(r));

    let yaml = format!(
        "source: watchdog\nreset: 1\ntimeout: {}\nset: {{source: guarded}}",
        timeout
    );
    Config::from_yaml(&yaml)
        .unwrap()
        .int_setter(&ctx, "mode")
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_never_overlap() {
    let target = Guarded::default();
    let set = watchdog(&target, "20ms").await;

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let set = set.clone();
            tokio::spawn(async move { set(3).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    // let re-assertions run alongside a final burst
    tokio::time::sleep(Duration::from_millis(50)).await;
    set(1).await.unwrap();

    assert_eq!(target.overlaps.load(Ordering::SeqCst), 0);
    assert!(target.writes.lock().unwrap().len() >= 101);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_reassertion() {
    let target = Guarded::default();
    let set = watchdog(&target, "10s").await;

    set(1).await.unwrap();
    set(3).await.unwrap();
    set(2).await.unwrap();
    // one re-assertion of the latest value only
    tokio::time::sleep(Duration::from_secs(6)).await;
    set(1).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(*target.writes.lock().unwrap(), vec![1, 3, 2, 2, 1]);
}
