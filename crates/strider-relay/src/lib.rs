//! `strider-relay` – Telemetry Relay
//!
//! A small hub that sits between the robot process and any number of
//! browser viewers.  The robot's telemetry bridge connects as the single
//! producer; viewers connect as consumers, receive every state frame and send
//! velocity commands back.
//!
//! # Modules
//!
//! - [`registry`] – [`ConnectionRegistry`]: producer slot and consumer set.
//! - [`server`] – [`RelayServer`]: HTTP + WebSocket listener that serves the
//!   embedded viewer page and routes frames between roles.

pub mod registry;
pub mod server;

pub use registry::{ConnectionRegistry, Role};
pub use server::{BoundRelay, DEFAULT_PORT, RelayServer, RelayStats, SharedRegistry};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use strider_bridge::{BridgeConfig, TelemetryBridge};
    use strider_input::{CommandSource, NetworkCommandSource, SharedCommand};
    use strider_runtime::state_feed;
    use strider_types::{BasePose, JointState, RobotState};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bridge_and_viewer_meet_through_the_relay() {
        let server = RelayServer::new().with_port(0);
        let registry = server.registry();
        let bound = server.bind().await.unwrap();
        let port = bound.local_addr().port();
        tokio::spawn(bound.serve());

        let mut source = NetworkCommandSource::new(SharedCommand::new());
        source.start().unwrap();
        let (publisher, subscriber) = state_feed();
        let config = BridgeConfig::new(format!("ws://127.0.0.1:{port}/ws"), vec!["hip".to_string()]);
        let mut bridge = TelemetryBridge::new(config, subscriber, Some(source.inbox()))
            .spawn()
            .unwrap();

        let (mut viewer, _) = connect_async(format!("ws://127.0.0.1:{port}/ws")).await.unwrap();
        viewer
            .send(Message::Text(r#"{"type":"web_connect"}"#.to_string().into()))
            .await
            .unwrap();

        // Keep the feed fresh so the bridge has something to send once both
        // ends are registered.
        let feeder = tokio::spawn(async move {
            loop {
                let joints = JointState {
                    position: vec![0.25],
                    velocity: vec![0.0],
                };
                publisher.publish(RobotState::capture(BasePose::default(), joints));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let state = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match viewer.next().await {
                    Some(Ok(Message::Text(text))) => {
                        break serde_json::from_str::<serde_json::Value>(text.as_str()).unwrap();
                    }
                    Some(_) => {}
                    None => panic!("viewer connection ended"),
                }
            }
        })
        .await
        .expect("no state reached the viewer");
        assert_eq!(state["type"], "state");
        assert_eq!(state["joint_names"][0], "hip");
        assert_eq!(state["joint_pos"][0], 0.25);
        assert!(registry.has_producer());

        viewer
            .send(Message::Text(
                r#"{"type":"command","x_vel":0.5,"y_vel":0.0,"ang_vel":-1.0}"#.to_string().into(),
            ))
            .await
            .unwrap();
        for _ in 0..200 {
            if source.get_command().x_vel == 0.5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let command = source.get_command();
        assert_eq!(command.x_vel, 0.5);
        assert_eq!(command.ang_vel, -1.0);

        feeder.abort();
        bridge.shutdown(Duration::from_secs(2));
        source.stop();
    }
}
