//! Integration tests for squall: wire frames in, scraped series and sunk
//! events out.

use std::net::{TcpListener as StdTcpListener, UdpSocket as StdUdpSocket};
use std::time::Duration;

use squall::config::{Config, HandlerConfig};
use squall::manager::{Manager, ManagerOptions};
use squall::plugins::Registry;

/// Reserve a free TCP port on localhost.
fn free_tcp_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind failed");
    listener.local_addr().expect("no local addr").port()
}

/// Reserve a free UDP port on localhost.
fn free_udp_port() -> u16 {
    let socket = StdUdpSocket::bind("127.0.0.1:0").expect("bind failed");
    socket.local_addr().expect("no local addr").port()
}

fn yaml(text: &str) -> serde_yaml::Value {
    serde_yaml::from_str(text).expect("invalid test yaml")
}

fn handler_descriptor(name: &str, config: &str) -> HandlerConfig {
    HandlerConfig {
        name: name.to_string(),
        config: yaml(config),
    }
}

/// Keep sending a datagram and polling the scrape endpoint until the body
/// matches, or fail after `deadline`.
async fn pump_until(
    udp_port: u16,
    frame: &[u8],
    scrape_url: &str,
    deadline: Duration,
    predicate: impl Fn(&str) -> bool,
) -> String {
    let sender = StdUdpSocket::bind("127.0.0.1:0").expect("bind failed");
    let target = format!("127.0.0.1:{udp_port}");

    tokio::time::timeout(deadline, async {
        loop {
            let _ = sender.send_to(frame, target.as_str());
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Ok(response) = reqwest::get(scrape_url).await {
                if let Ok(body) = response.text().await {
                    if predicate(&body) {
                        return body;
                    }
                }
            }
        }
    })
    .await
    .expect("condition not reached before deadline")
}

async fn scrape(url: &str) -> String {
    reqwest::get(url)
        .await
        .expect("scrape request failed")
        .text()
        .await
        .expect("scrape body unreadable")
}

mod scrape_sink_tests {
    use super::*;

    /// One frame in, one exposed series with value and timestamp out; after
    /// idling past its expiry window (and having been scraped), the series
    /// disappears.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_to_scrape_to_expiry() {
        let udp_port = free_udp_port();
        let http_port = free_tcp_port();

        let mut manager = Manager::new(Registry::builtin(), ManagerOptions::default());
        manager
            .init_transport("udp", yaml(&format!("address: 127.0.0.1:{udp_port}")))
            .unwrap();
        manager
            .set_transport_handlers("udp", &[handler_descriptor("metrics-line", "interval: 1")])
            .unwrap();
        manager
            .init_application(
                "prometheus",
                yaml(&format!("port: {http_port}\nwithTimestamp: true")),
            )
            .unwrap();

        let shutdown = manager.shutdown_token();
        manager.run_transports();
        manager.run_applications();
        let runner = tokio::spawn(manager.run_until_shutdown());

        let url = format!("http://127.0.0.1:{http_port}/metrics");
        let body = pump_until(
            udp_port,
            b"m,a=1,b=2 17.0 1000",
            &url,
            Duration::from_secs(10),
            |body| body.contains("m{a=\"1\",b=\"2\"} 17 1000000"),
        )
        .await;
        assert!(body.contains("# TYPE m gauge"));

        // Idle past interval * expirationMultiple (1s * 2). The scrape above
        // already observed the series, so the reaper may collect it on its
        // next tick.
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                if !scrape(&url).await.contains("m{") {
                    break;
                }
            }
        })
        .await
        .expect("idle series was never expired");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("manager did not shut down")
            .unwrap();
    }

    /// Same metric name at two dimensionalities yields two live series.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_differing_dimensionality_series_coexist() {
        let udp_port = free_udp_port();
        let http_port = free_tcp_port();

        let mut manager = Manager::new(Registry::builtin(), ManagerOptions::default());
        manager
            .init_transport("udp", yaml(&format!("address: 127.0.0.1:{udp_port}")))
            .unwrap();
        manager
            .set_transport_handlers(
                "udp",
                &[handler_descriptor("metrics-line", "interval: 3600")],
            )
            .unwrap();
        manager
            .init_application("prometheus", yaml(&format!("port: {http_port}")))
            .unwrap();

        let shutdown = manager.shutdown_token();
        manager.run_transports();
        manager.run_applications();
        let runner = tokio::spawn(manager.run_until_shutdown());

        let url = format!("http://127.0.0.1:{http_port}/metrics");
        let body = pump_until(
            udp_port,
            b"m,a=1 1\nm,a=1,b=2 2",
            &url,
            Duration::from_secs(10),
            |body| body.contains("m{a=\"1\"}") && body.contains("m{a=\"1\",b=\"2\"}"),
        )
        .await;
        assert!(body.contains("m{a=\"1\"} 1"));
        assert!(body.contains("m{a=\"1\",b=\"2\"} 2"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("manager did not shut down")
            .unwrap();
    }

    /// The index page links to /metrics.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_index_page_links_to_metrics() {
        let udp_port = free_udp_port();
        let http_port = free_tcp_port();

        let mut manager = Manager::new(Registry::builtin(), ManagerOptions::default());
        manager
            .init_transport("udp", yaml(&format!("address: 127.0.0.1:{udp_port}")))
            .unwrap();
        manager
            .init_application("prometheus", yaml(&format!("port: {http_port}")))
            .unwrap();

        let shutdown = manager.shutdown_token();
        manager.run_transports();
        manager.run_applications();
        let runner = tokio::spawn(manager.run_until_shutdown());

        let url = format!("http://127.0.0.1:{http_port}/");
        let body = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(response) = reqwest::get(&url).await {
                    if let Ok(body) = response.text().await {
                        return body;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("index page never came up");
        assert!(body.contains("/metrics"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("manager did not shut down")
            .unwrap();
    }
}

mod event_pipeline_tests {
    use super::*;

    /// Events decoded from the wire reach a file sink with every field
    /// intact (wire JSON -> bus -> subscriber -> JSON file).
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_event_round_trip_through_print_sink() {
        let udp_port = free_udp_port();
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.json");

        let mut manager = Manager::new(
            Registry::builtin(),
            ManagerOptions {
                block_event_bus: true,
                ..Default::default()
            },
        );
        manager
            .init_transport("udp", yaml(&format!("address: 127.0.0.1:{udp_port}")))
            .unwrap();
        manager
            .set_transport_handlers("udp", &[handler_descriptor("events-json", "null")])
            .unwrap();
        manager
            .init_application(
                "print",
                yaml(&format!(
                    "metricOutput: {}\neventsOutput: {}",
                    dir.path().join("metrics.json").display(),
                    events_path.display()
                )),
            )
            .unwrap();

        let shutdown = manager.shutdown_token();
        manager.run_transports();
        manager.run_applications();
        let runner = tokio::spawn(manager.run_until_shutdown());

        let wire_event = serde_json::json!({
            "index": "alerts",
            "type": "alert",
            "publisher": "node-1",
            "severity": "critical",
            "message": "disk failure",
            "labels": {"host": "node-1"},
            "annotations": {"device": "sda"}
        });
        let frame = serde_json::to_vec(&wire_event).unwrap();

        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let target = format!("127.0.0.1:{udp_port}");
        let written = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let _ = sender.send_to(&frame, target.as_str());
                tokio::time::sleep(Duration::from_millis(50)).await;
                let contents = tokio::fs::read_to_string(&events_path)
                    .await
                    .unwrap_or_default();
                if contents.contains("disk failure") {
                    return contents;
                }
            }
        })
        .await
        .expect("event never reached the print sink");

        // the sink writes pretty JSON documents; take the first one
        let first_doc: serde_json::Value = serde_json::Deserializer::from_str(&written)
            .into_iter()
            .next()
            .expect("no JSON document written")
            .expect("sink wrote invalid JSON");
        assert_eq!(first_doc["index"], "alerts");
        assert_eq!(first_doc["type"], "alert");
        assert_eq!(first_doc["publisher"], "node-1");
        assert_eq!(first_doc["severity"], "critical");
        assert_eq!(first_doc["labels"]["host"], "node-1");
        assert_eq!(first_doc["annotations"]["device"], "sda");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("manager did not shut down")
            .unwrap();
    }
}

mod lifecycle_tests {
    use super::*;
    use async_trait::async_trait;
    use squall::{FrameDispatcher, PluginDone, Transport};
    use squall_core::error::ConfigError;
    use tokio_util::sync::CancellationToken;

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        fn configure(&mut self, _config: serde_yaml::Value) -> Result<(), ConfigError> {
            Ok(())
        }

        async fn run(
            &self,
            _shutdown: CancellationToken,
            _frames: FrameDispatcher,
            done: PluginDone,
        ) {
            done.signal().await;
        }
    }

    /// A transport exiting prematurely takes the whole process down: the
    /// scrape endpoint closes and the manager joins every plugin.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_premature_plugin_exit_tears_everything_down() {
        let http_port = free_tcp_port();

        let mut registry = Registry::builtin();
        registry.register_transport("failing", || Box::new(FailingTransport));

        let mut manager = Manager::new(registry, ManagerOptions::default());
        manager
            .init_transport("failing", serde_yaml::Value::Null)
            .unwrap();
        manager
            .init_application("prometheus", yaml(&format!("port: {http_port}")))
            .unwrap();

        manager.run_transports();
        manager.run_applications();

        tokio::time::timeout(Duration::from_secs(10), manager.run_until_shutdown())
            .await
            .expect("premature plugin exit did not shut squall down");

        // the scrape endpoint must be gone
        assert!(reqwest::get(format!("http://127.0.0.1:{http_port}/metrics"))
            .await
            .is_err());
    }
}

mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_full_config_file_with_interpolation() {
        std::env::set_var("SQUALL_TEST_SOCKET_PATH", "/var/run/squall/in.sock");

        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            r#"
pluginDir: /usr/lib64/squall
logLevel: warn
blockEventBus: false
handlerErrors: 16
transports:
  - name: socket
    config:
      path: ${{SQUALL_TEST_SOCKET_PATH}}
    handlers:
      - name: metrics-line
        config:
          interval: 10
          metricType: gauge
applications:
  - name: prometheus
    config:
      port: 3000
      withTimestamp: true
  - name: print
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.handler_errors, 16);
        assert_eq!(
            config.transports[0].config["path"],
            serde_yaml::Value::String("/var/run/squall/in.sock".into())
        );
        assert_eq!(config.applications.len(), 2);
        assert!(config.applications[1].config.is_null());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/squall.yaml")).unwrap_err();
        assert!(matches!(
            err,
            squall_core::error::ConfigError::ReadFile { .. }
        ));
    }
}
