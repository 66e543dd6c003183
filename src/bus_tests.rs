//! Unit tests for the EventBus - the single-consumer dispatch queue.

#[cfg(test)]
mod bus_tests {
    use chrono::Utc;

    use crate::bus::EventBus;
    use crate::events::RawEvent;

    fn raw(id: &str) -> RawEvent {
        RawEvent {
            event_id: id.to_string(),
            channel_id: "c".to_string(),
            author_id: "a".to_string(),
            author_name: "alice".to_string(),
            content: format!("message {}", id),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_eventbus_publish_receive() {
        let (bus, mut rx) = EventBus::new();
        bus.publish(raw("1")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, "1");
        assert_eq!(received.content, "message 1");
    }

    #[tokio::test]
    async fn test_eventbus_preserves_order_across_producers() {
        let (bus, mut rx) = EventBus::new();
        let second = bus.clone();

        bus.publish(raw("1")).unwrap();
        second.publish(raw("2")).unwrap();
        bus.publish(raw("3")).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(rx.recv().await.unwrap().event_id);
        }
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_eventbus_producers_from_tasks() {
        let (bus, mut rx) = EventBus::new();

        let mut handles = Vec::new();
        for i in 0..5 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                bus.publish(raw(&i.to_string())).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(!event.event_id.is_empty());
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_eventbus_publish_after_receiver_dropped() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        assert!(bus.is_closed());
        assert!(bus.publish(raw("1")).is_err());
    }
}
