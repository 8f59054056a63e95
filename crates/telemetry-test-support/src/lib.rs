//! Shared test doubles for the master and node bridge test suites: a mock
//! master `nodes_ws` endpoint, a plain-text WebSocket client standing in
//! for a browser client or a node, and a scripted serial poll source.

pub mod fake_poll_source;
pub mod mock_master_node;
pub mod text_ws_client;

pub use fake_poll_source::{FakePollSource, FakeResponse};
pub use mock_master_node::MockMasterNodeEndpoint;
pub use text_ws_client::TextWsClient;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_session::PollSource;

    #[tokio::test]
    async fn mock_master_node_roundtrips_uplink_and_downlink() {
        let endpoint = MockMasterNodeEndpoint::start().await.unwrap();
        let mut client = TextWsClient::connect(&endpoint.url()).await.unwrap();

        client
            .send_text(r#"{"user":"lab7","error":false,"x":1700000000.0,"ch0":1.65}"#)
            .await
            .unwrap();
        let received = endpoint.recv_uplink().await.unwrap();
        assert!(received.contains("lab7"));

        endpoint.send_downlink("X,50,0");
        let downlink = client.recv_text().await.unwrap();
        assert_eq!(downlink, "X,50,0");
    }

    #[test]
    fn fake_poll_source_replays_scripted_responses_in_order() {
        let mut source = FakePollSource::new([
            FakeResponse::Empty,
            FakeResponse::Reading(1_700_000_000.0, vec![1.65, 0.5]),
        ]);
        assert_eq!(source.poll(0x41).unwrap(), None);
        assert_eq!(
            source.poll(0x41).unwrap(),
            Some((1_700_000_000.0, vec![1.65, 0.5]))
        );
    }

    #[test]
    fn fake_poll_source_closes_on_lost() {
        let mut source = FakePollSource::new([FakeResponse::Lost]);
        assert!(source.poll(0x41).is_err());
        assert!(source.is_closed());
        assert!(source.poll(0x41).is_err());
    }
}
