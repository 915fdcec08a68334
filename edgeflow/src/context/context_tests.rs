//! Tests for the function context.

#[cfg(test)]
mod tests {
    use crate::context::{FunctionContext, PIPELINE_ID_KEY};
    use crate::messaging::{InMemoryMessageBus, MessageClient};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_blank_correlation_id_is_generated() {
        let ctx = FunctionContext::new("", "application/json");
        assert!(!ctx.correlation_id().is_empty());

        let ctx = FunctionContext::new("abc", "application/json");
        assert_eq!(ctx.correlation_id(), "abc");
    }

    #[test]
    fn test_override_correlation_id() {
        let mut ctx = FunctionContext::new("abc", "");
        ctx.override_correlation_id("xyz");
        assert_eq!(ctx.correlation_id(), "xyz");
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut ctx = FunctionContext::new("c", "");
        ctx.add_value("Foo", "1");

        assert_eq!(ctx.get_value("foo"), ("1".to_string(), true));
        assert_eq!(ctx.get_value("FOO"), ("1".to_string(), true));
        assert_eq!(ctx.get_value("bar"), (String::new(), false));
    }

    #[test]
    fn test_remove_value() {
        let mut ctx = FunctionContext::new("c", "");
        ctx.add_value("Key", "v");
        ctx.remove_value("KEY");
        assert!(ctx.value("key").is_none());
    }

    #[test]
    fn test_clone_isolates_values() {
        let mut original = FunctionContext::new("c", "");
        original.add_value("shared", "1");

        let mut clone = original.clone();
        clone.add_value("shared", "2");
        clone.add_value("only-clone", "x");

        assert_eq!(original.value("shared"), Some("1"));
        assert!(original.value("only-clone").is_none());
        assert_eq!(clone.correlation_id(), original.correlation_id());
    }

    #[test]
    fn test_get_values_is_a_copy() {
        let mut ctx = FunctionContext::new("c", "");
        ctx.add_value("a", "1");
        let mut values = ctx.get_values();
        values.insert("b".into(), "2".into());
        assert!(ctx.value("b").is_none());
    }

    #[test]
    fn test_pipeline_id_reads_reserved_key() {
        let mut ctx = FunctionContext::new("c", "");
        assert_eq!(ctx.pipeline_id(), "");
        ctx.add_value(PIPELINE_ID_KEY, "p1");
        assert_eq!(ctx.pipeline_id(), "p1");
    }

    #[test]
    fn test_apply_values() {
        let mut ctx = FunctionContext::new("c", "");
        ctx.add_value("DeviceName", "d1");
        ctx.add_value("profilename", "p1");

        let topic = ctx.apply_values("out/{devicename}/{ProfileName}").unwrap();
        assert_eq!(topic, "out/d1/p1");
        assert_eq!(ctx.apply_values("plain").unwrap(), "plain");
    }

    #[test]
    fn test_apply_values_unresolved_is_error() {
        let ctx = FunctionContext::new("c", "");
        let err = ctx.apply_values("out/{missing}").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("{missing}"));
    }

    #[test]
    fn test_retry_fields() {
        let mut ctx = FunctionContext::new("c", "");
        assert!(ctx.retry_data().is_none());
        ctx.set_retry_data(Some(b"r".to_vec()));
        assert_eq!(ctx.retry_data(), Some(&b"r"[..]));

        ctx.trigger_retry_failed_data();
        assert!(ctx.retry_triggered());
        ctx.clear_retry_trigger();
        assert!(!ctx.retry_triggered());
    }

    #[test]
    fn test_response_fields() {
        let mut ctx = FunctionContext::new("c", "");
        ctx.set_response_data(b"body".to_vec());
        ctx.set_response_content_type("text/plain");
        assert_eq!(ctx.response_data(), Some(&b"body"[..]));
        assert_eq!(ctx.response_content_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_publish_resolves_topic() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let mut ctx = FunctionContext::new("corr", "")
            .with_message_client(bus.clone())
            .with_publish_topic("out/{devicename}");
        ctx.add_value("devicename", "d9");

        ctx.publish(b"data".to_vec(), "text/plain").await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "out/d9");
        assert_eq!(published[0].1.correlation_id, "corr");
    }

    #[tokio::test]
    async fn test_publish_without_client_fails() {
        let ctx = FunctionContext::new("c", "");
        assert!(ctx.publish_with_topic("t", Vec::new(), "text/plain").await.is_err());

        let bus: Arc<dyn MessageClient> = Arc::new(InMemoryMessageBus::new());
        let ctx = FunctionContext::new("c", "").with_message_client(bus);
        assert!(ctx.publish(Vec::new(), "text/plain").await.is_err());
    }
}
