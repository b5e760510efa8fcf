// One-time server bootstrap shared by every integration test in a binary.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

// Stable WebSocket URL handed to all tests once the server publishes its
// bound address.
static WS_URL: OnceLock<String> = OnceLock::new();
static SERVER_READY: OnceLock<()> = OnceLock::new();

/// Boots the sync server once on an ephemeral port and returns the shared
/// `ws://…/sync` endpoint URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published = Arc::new(OnceLock::<String>::new());
        let published_thread = Arc::clone(&published);

        // A dedicated OS thread with its own runtime, so the server outlives
        // each `#[tokio::test]` runtime.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_thread.set(format!("ws://{addr}/sync"));
                sync_server::run(listener).await.expect("server failed");
            });
        });

        wait_for_readiness(published);
    });

    WS_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_readiness(published: Arc<OnceLock<String>>) {
    let url = loop {
        if let Some(url) = published.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    let _ = WS_URL.set(url.clone());

    // Probe raw TCP until the listener accepts, so the first test never
    // races server startup.
    let addr = url
        .strip_prefix("ws://")
        .and_then(|rest| rest.strip_suffix("/sync"))
        .expect("url should be ws://host:port/sync");
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}
