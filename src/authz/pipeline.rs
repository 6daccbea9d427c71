//! The interception points a transport calls into.
//!
//! Every hook returns `Ok(())` to let the operation proceed, or the
//! [`AccessError`] the transport should hand back to the client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::authz::channel::{classify_channel, Channel};
use crate::authz::engine::{decide, Decision, Evaluator};
use crate::authz::errors::AccessError;
use crate::authz::registry::RuleRegistry;
use crate::authz::types::{
    AccessContext, Action, Direction, EmitRequest, PublishInRequest, PublishOutRequest, Query,
    QueryHandle, Socket, SubscribeRequest,
};

const NO_RULES_SUFFIX: &str = " - No access control rules found";

/// What happens when a resource type has no evaluator for a direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyDefaults {
    pub block_inbound_by_default: bool,
    pub block_outbound_by_default: bool,
    /// Upper bound on a single evaluator run. `None` waits forever.
    pub evaluator_timeout: Option<Duration>,
}

impl PolicyDefaults {
    fn blocks(&self, direction: Direction) -> bool {
        match direction {
            Direction::Inbound => self.block_inbound_by_default,
            Direction::Outbound => self.block_outbound_by_default,
        }
    }
}

pub struct AccessControl {
    registry: Arc<RuleRegistry>,
    defaults: PolicyDefaults,
    query_handle: Option<QueryHandle>,
}

impl AccessControl {
    pub fn new(registry: Arc<RuleRegistry>, defaults: PolicyDefaults) -> Self {
        Self {
            registry,
            defaults,
            query_handle: None,
        }
    }

    /// Handle passed through to every evaluator as `ctx.query_handle`.
    pub fn with_query_handle(mut self, handle: QueryHandle) -> Self {
        self.query_handle = Some(handle);
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> PolicyDefaults {
        self.defaults
    }

    /// Client-originated create/read/update/delete. Other events pass.
    pub async fn on_emit(&self, req: &EmitRequest) -> Result<(), AccessError> {
        let Some(action) = Action::from_crud_event(&req.event) else {
            return Ok(());
        };
        let query = Query::Request(req.data.clone());
        let resource_type = query.resource_type().map(str::to_string);
        let denial = format!(
            "You are not permitted to perform a CRUD operation on {}",
            describe_resource(resource_type.as_deref(), query.id())
        );

        let Some(evaluator) = self.resolve(resource_type.as_deref(), Direction::Inbound) else {
            return self.fallback(Direction::Inbound, "emit", denial);
        };
        let ctx = self.context(req.socket.clone(), action, query);
        self.run(evaluator, &ctx, "emit", denial).await
    }

    /// Clients never publish into CRUD channels; the server does.
    pub async fn on_publish_in(&self, req: &PublishInRequest) -> Result<(), AccessError> {
        if !matches!(classify_channel(&req.channel), Channel::Other) {
            tracing::info!(
                channel = %req.channel,
                socket = req.socket.id(),
                "Rejected client publish into CRUD channel"
            );
            return Err(AccessError::PublishNotAllowed);
        }
        Ok(())
    }

    /// Server broadcast on a channel, checked once per receiving socket.
    pub async fn on_publish_out(&self, req: &PublishOutRequest) -> Result<(), AccessError> {
        let denial = format!("Cannot publish out to {} channel", req.channel);
        let resource_query = match classify_channel(&req.channel) {
            Channel::Resource(query) => query,
            Channel::Malformed => return self.fallback(Direction::Outbound, "publish_out", denial),
            Channel::Other => return Ok(()),
        };

        let Some(evaluator) =
            self.resolve(Some(resource_query.resource_type()), Direction::Outbound)
        else {
            return self.fallback(Direction::Outbound, "publish_out", denial);
        };
        let ctx = self
            .context(
                req.socket.clone(),
                Action::Publish,
                Query::Channel(resource_query),
            )
            .with_resource(req.data.clone());
        self.run(evaluator, &ctx, "publish_out", denial).await
    }

    /// Subscription requests are treated as read grants on the channel's
    /// resource.
    pub async fn on_subscribe(&self, req: &SubscribeRequest) -> Result<(), AccessError> {
        let denial = format!("Cannot subscribe to {} channel", req.channel);
        // A malformed channel has no rule, so the bypass flag does not apply.
        let resource_query = match classify_channel(&req.channel) {
            Channel::Resource(query) => query,
            Channel::Malformed => return self.fallback(Direction::Inbound, "subscribe", denial),
            Channel::Other => return Ok(()),
        };

        let Some(evaluator) =
            self.resolve(Some(resource_query.resource_type()), Direction::Inbound)
        else {
            return self.fallback(Direction::Inbound, "subscribe", denial);
        };
        if req.allow_crud_access {
            tracing::debug!(
                channel = %req.channel,
                socket = req.socket.id(),
                "Subscription pre-approved by server, skipping evaluation"
            );
            return Ok(());
        }
        let ctx = self.context(
            req.socket.clone(),
            Action::Subscribe,
            Query::Channel(resource_query),
        );
        self.run(evaluator, &ctx, "subscribe", denial).await
    }

    /// Check data the query layer is about to return to a single requester.
    /// `ctx.query` names the resource and `ctx.resource` holds the data.
    pub async fn filter_outbound_read(&self, ctx: &AccessContext) -> Result<(), AccessError> {
        let resource_type = ctx.query.resource_type();
        let denial = format!(
            "You are not permitted to perform a CRUD read operation on {}",
            describe_resource(resource_type, ctx.query.id())
        );

        let Some(evaluator) = self.resolve(resource_type, Direction::Outbound) else {
            return self.fallback(Direction::Outbound, "read_filter", denial);
        };
        let ctx = ctx
            .clone()
            .with_query_handle(ctx.query_handle.clone().or_else(|| self.query_handle.clone()));
        self.run(evaluator, &ctx, "read_filter", denial).await
    }

    fn resolve(
        &self,
        resource_type: Option<&str>,
        direction: Direction,
    ) -> Option<&Arc<dyn Evaluator>> {
        self.registry.lookup(resource_type?, direction)
    }

    fn context(&self, socket: Arc<dyn Socket>, action: Action, query: Query) -> AccessContext {
        AccessContext::new(socket, action, query).with_query_handle(self.query_handle.clone())
    }

    fn fallback(
        &self,
        direction: Direction,
        hook: &'static str,
        denial: String,
    ) -> Result<(), AccessError> {
        if self.defaults.blocks(direction) {
            tracing::info!(hook, %direction, reason = %denial, "No access control rule, blocked by default");
            Err(AccessError::Blocked(denial + NO_RULES_SUFFIX))
        } else {
            tracing::debug!(hook, %direction, "No access control rule, allowed by default");
            Ok(())
        }
    }

    async fn run(
        &self,
        evaluator: &Arc<dyn Evaluator>,
        ctx: &AccessContext,
        hook: &'static str,
        denial: String,
    ) -> Result<(), AccessError> {
        match decide(evaluator.as_ref(), ctx, self.defaults.evaluator_timeout).await {
            Ok(Decision::Allowed) => {
                tracing::debug!(hook, action = %ctx.action, socket = ctx.socket.id(), "Access allowed");
                Ok(())
            }
            Ok(Decision::Denied) => {
                tracing::info!(hook, action = %ctx.action, socket = ctx.socket.id(), reason = %denial, "Access denied");
                Err(AccessError::Blocked(denial))
            }
            Err(e) => {
                tracing::warn!(hook, action = %ctx.action, socket = ctx.socket.id(), error = %e, "Access evaluator failed, denying");
                Err(AccessError::Evaluator(format!("{denial}: {e}")))
            }
        }
    }
}

fn describe_resource(resource_type: Option<&str>, id: Option<String>) -> String {
    match (resource_type, id) {
        (Some(t), Some(id)) => format!("the {t} resource with ID {id}"),
        (Some(t), None) => format!("the {t} resource"),
        (None, Some(id)) => format!("an untyped resource with ID {id}"),
        (None, None) => "an untyped resource".to_string(),
    }
}

/// Convenience for transports that only have the outgoing payload and the
/// query it answers.
pub fn read_context(
    socket: Arc<dyn Socket>,
    query: Value,
    resource: Option<Value>,
) -> AccessContext {
    let ctx = AccessContext::new(socket, Action::Read, Query::Request(query));
    match resource {
        Some(resource) => ctx.with_resource(resource),
        None => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::engine::{evaluator_fn, Constant};
    use crate::authz::errors::EvaluationError;
    use crate::authz::registry::AccessRule;
    use crate::authz::types::RemoteSocket;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn anonymous() -> Arc<dyn Socket> {
        Arc::new(RemoteSocket {
            id: "anon".into(),
            auth_token: None,
        })
    }

    fn alice() -> Arc<dyn Socket> {
        Arc::new(RemoteSocket {
            id: "alice-socket".into(),
            auth_token: Some(json!({ "username": "alice" })),
        })
    }

    fn signed_in_only() -> impl Evaluator {
        evaluator_fn(|ctx: AccessContext| async move { Ok(ctx.auth_token.is_some()) })
    }

    fn engine(registry: RuleRegistry, inbound: bool, outbound: bool) -> AccessControl {
        AccessControl::new(
            Arc::new(registry),
            PolicyDefaults {
                block_inbound_by_default: inbound,
                block_outbound_by_default: outbound,
                evaluator_timeout: None,
            },
        )
    }

    fn emit(event: &str, data: Value, socket: Arc<dyn Socket>) -> EmitRequest {
        EmitRequest {
            event: event.into(),
            data,
            socket,
        }
    }

    fn subscribe(channel: &str, socket: Arc<dyn Socket>, allow: bool) -> SubscribeRequest {
        SubscribeRequest {
            channel: channel.into(),
            socket,
            allow_crud_access: allow,
        }
    }

    fn publish_out(channel: &str, data: Value) -> PublishOutRequest {
        PublishOutRequest {
            channel: channel.into(),
            data,
            socket: anonymous(),
        }
    }

    #[tokio::test]
    async fn test_default_deny_without_rule() {
        let ac = engine(RuleRegistry::empty(), true, false);
        let err = ac
            .on_emit(&emit("create", json!({ "type": "Secret", "id": "s1" }), alice()))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "CRUDBlockedError");
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD operation on the Secret resource with ID s1 - No access control rules found"
        );
    }

    #[tokio::test]
    async fn test_default_allow_without_rule() {
        let ac = engine(RuleRegistry::empty(), false, true);
        ac.on_emit(&emit("create", json!({ "type": "Secret" }), anonymous()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rule_takes_precedence_over_default() {
        for block in [true, false] {
            let registry = RuleRegistry::builder()
                .inbound("Post", signed_in_only())
                .unwrap()
                .build();
            let ac = engine(registry, block, block);

            let err = ac
                .on_emit(&emit("create", json!({ "type": "Post" }), anonymous()))
                .await
                .unwrap_err();
            assert_eq!(
                err,
                AccessError::Blocked(
                    "You are not permitted to perform a CRUD operation on the Post resource".into()
                )
            );

            ac.on_emit(&emit("create", json!({ "type": "Post" }), alice()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_non_crud_events_bypass_emit() {
        let registry = RuleRegistry::builder()
            .inbound("Post", Constant(false))
            .unwrap()
            .build();
        let ac = engine(registry, true, true);
        ac.on_emit(&emit("chat", json!({ "type": "Post" }), anonymous()))
            .await
            .unwrap();
        ac.on_emit(&emit("subscribe", json!({ "type": "Post" }), anonymous()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_emit_context_carries_action_and_payload() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(|ctx: AccessContext| async move {
                    Ok(ctx.action == Action::Update
                        && ctx.query == Query::Request(json!({ "type": "Post", "id": "7", "field": "title" }))
                        && ctx.resource.is_none())
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, true, true);
        ac.on_emit(&emit(
            "update",
            json!({ "type": "Post", "id": "7", "field": "title" }),
            alice(),
        ))
        .await
        .unwrap();
        assert!(ac
            .on_emit(&emit("delete", json!({ "type": "Post", "id": "7", "field": "title" }), alice()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_emit_without_type_falls_back_to_default() {
        let ac = engine(RuleRegistry::empty(), true, false);
        let err = ac
            .on_emit(&emit("read", json!({ "id": 3 }), alice()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD operation on an untyped resource with ID 3 - No access control rules found"
        );

        // Non-string types never match a rule
        let err = ac
            .on_emit(&emit("read", json!({ "type": 5, "id": 3 }), alice()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD operation on an untyped resource with ID 3 - No access control rules found"
        );
        let permissive = engine(RuleRegistry::empty(), false, false);
        permissive
            .on_emit(&emit("read", json!({ "type": 5 }), alice()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_in_always_blocked_for_crud_channels() {
        let registry = RuleRegistry::builder()
            .rule("Post", AccessRule::new().inbound(Constant(true)).outbound(Constant(true)))
            .unwrap()
            .build();
        let channels = [
            "crud>Post",
            "crud>Post/1",
            "crud>Post/1/title",
            "crud>Unknown",
            r#"crud>recent({"n":5}):Post"#,
            "crud>view(garbage):Post",
            "crud>Post/1>extra",
        ];
        for defaults in [(false, false), (true, true)] {
            let ac = engine(registry.clone(), defaults.0, defaults.1);
            for channel in channels {
                let err = ac
                    .on_publish_in(&PublishInRequest {
                        channel: channel.into(),
                        data: json!({}),
                        socket: alice(),
                    })
                    .await
                    .unwrap_err();
                assert_eq!(err, AccessError::PublishNotAllowed, "channel {channel}");
            }
        }
    }

    #[tokio::test]
    async fn test_non_crud_channels_pass_every_hook() {
        let ac = engine(RuleRegistry::empty(), true, true);
        let channel = "chat>room1";
        ac.on_publish_in(&PublishInRequest {
            channel: channel.into(),
            data: json!("hello"),
            socket: anonymous(),
        })
        .await
        .unwrap();
        ac.on_publish_out(&publish_out(channel, json!("hello")))
            .await
            .unwrap();
        ac.on_subscribe(&subscribe(channel, anonymous(), false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_crud_channels_are_not_plain_channels() {
        let registry = RuleRegistry::builder()
            .rule("Post", AccessRule::new().inbound(Constant(true)).outbound(Constant(true)))
            .unwrap()
            .build();
        let channels = ["crud>/1", "crud>v(x):", "crud>Post:1"];

        let strict = engine(registry.clone(), true, true);
        for channel in channels {
            let err = strict
                .on_publish_in(&PublishInRequest {
                    channel: channel.into(),
                    data: json!({}),
                    socket: alice(),
                })
                .await
                .unwrap_err();
            assert_eq!(err, AccessError::PublishNotAllowed, "channel {channel}");

            // The bypass flag has no rule to skip
            let err = strict
                .on_subscribe(&subscribe(channel, alice(), true))
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Cannot subscribe to {channel} channel - No access control rules found")
            );

            let err = strict
                .on_publish_out(&publish_out(channel, json!({})))
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Cannot publish out to {channel} channel - No access control rules found")
            );
        }

        let permissive = engine(registry, false, false);
        for channel in channels {
            let err = permissive
                .on_publish_in(&PublishInRequest {
                    channel: channel.into(),
                    data: json!({}),
                    socket: alice(),
                })
                .await
                .unwrap_err();
            assert_eq!(err, AccessError::PublishNotAllowed, "channel {channel}");
            permissive
                .on_subscribe(&subscribe(channel, alice(), false))
                .await
                .unwrap();
            permissive
                .on_publish_out(&publish_out(channel, json!({})))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_publish_out_uses_outbound_rule_with_resource() {
        let registry = RuleRegistry::builder()
            .outbound(
                "Post",
                evaluator_fn(|ctx: AccessContext| async move {
                    let public = ctx
                        .resource
                        .as_ref()
                        .and_then(|r| r.get("public"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    Ok(ctx.action == Action::Publish && public)
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, true, true);

        ac.on_publish_out(&publish_out("crud>Post/1", json!({ "public": true })))
            .await
            .unwrap();
        let err = ac
            .on_publish_out(&publish_out("crud>Post/1", json!({ "public": false })))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::Blocked("Cannot publish out to crud>Post/1 channel".into())
        );
    }

    #[tokio::test]
    async fn test_publish_out_default_block() {
        let registry = RuleRegistry::builder()
            .inbound("Post", Constant(true))
            .unwrap()
            .build();
        let ac = engine(registry, false, true);
        let err = ac
            .on_publish_out(&publish_out("crud>Post", json!({})))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot publish out to crud>Post channel - No access control rules found"
        );

        let ac = engine(RuleRegistry::empty(), true, false);
        ac.on_publish_out(&publish_out("crud>Post", json!({})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_evaluates_inbound_rule() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(|ctx: AccessContext| async move {
                    Ok(ctx.action == Action::Subscribe && ctx.auth_token.is_some())
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, false, false);

        ac.on_subscribe(&subscribe("crud>Post/1", alice(), false))
            .await
            .unwrap();
        let err = ac
            .on_subscribe(&subscribe("crud>Post/1", anonymous(), false))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::Blocked("Cannot subscribe to crud>Post/1 channel".into())
        );
    }

    #[tokio::test]
    async fn test_subscribe_bypass_skips_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(move |_ctx: AccessContext| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(false)
                    }
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, true, true);

        ac.on_subscribe(&subscribe("crud>Post", anonymous(), true))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(ac
            .on_subscribe(&subscribe("crud>Post", anonymous(), false))
            .await
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_bypass_does_not_override_missing_rule() {
        let ac = engine(RuleRegistry::empty(), true, false);
        let err = ac
            .on_subscribe(&subscribe("crud>Post", alice(), true))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot subscribe to crud>Post channel - No access control rules found"
        );
    }

    #[tokio::test]
    async fn test_subscribe_on_view_channel_uses_view_type() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Person",
                evaluator_fn(|ctx: AccessContext| async move {
                    Ok(ctx.query.resource_type() == Some("Person"))
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, true, true);
        ac.on_subscribe(&subscribe(r#"crud>adults({"age":18}):Person"#, anonymous(), false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_filter_outbound_read() {
        let registry = RuleRegistry::builder()
            .outbound(
                "Post",
                evaluator_fn(|ctx: AccessContext| async move {
                    let owner = ctx.resource.as_ref().and_then(|r| r.get("owner")).cloned();
                    let user = ctx.auth_token.as_ref().and_then(|t| t.get("username")).cloned();
                    Ok(owner.is_some() && owner == user)
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, false, false);

        let mine = read_context(
            alice(),
            json!({ "type": "Post", "id": "9" }),
            Some(json!({ "owner": "alice" })),
        );
        ac.filter_outbound_read(&mine).await.unwrap();

        let theirs = read_context(
            alice(),
            json!({ "type": "Post", "id": "9" }),
            Some(json!({ "owner": "bob" })),
        );
        let err = ac.filter_outbound_read(&theirs).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD read operation on the Post resource with ID 9"
        );
    }

    #[tokio::test]
    async fn test_filter_outbound_read_defaults() {
        let ctx = read_context(anonymous(), json!({ "type": "Secret", "id": "1" }), None);

        let ac = engine(RuleRegistry::empty(), false, true);
        let err = ac.filter_outbound_read(&ctx).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD read operation on the Secret resource with ID 1 - No access control rules found"
        );

        let ac = engine(RuleRegistry::empty(), true, false);
        ac.filter_outbound_read(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_evaluator_denies() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(|_ctx: AccessContext| async move {
                    Err(EvaluationError::failed("lookup failed"))
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, false, false);
        let err = ac
            .on_emit(&emit("read", json!({ "type": "Post", "id": "1" }), alice()))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "EvaluatorError");
        assert_eq!(
            err.to_string(),
            "You are not permitted to perform a CRUD operation on the Post resource with ID 1: lookup failed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_evaluator_fails_closed_with_timeout() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(|_ctx: AccessContext| async move {
                    std::future::pending::<()>().await;
                    Ok(true)
                }),
            )
            .unwrap()
            .build();
        let ac = AccessControl::new(
            Arc::new(registry),
            PolicyDefaults {
                evaluator_timeout: Some(Duration::from_millis(50)),
                ..PolicyDefaults::default()
            },
        );
        let err = ac
            .on_subscribe(&subscribe("crud>Post", alice(), false))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "EvaluatorError");
    }

    #[tokio::test]
    async fn test_query_handle_reaches_evaluator() {
        let registry = RuleRegistry::builder()
            .inbound(
                "Post",
                evaluator_fn(|ctx: AccessContext| async move {
                    let limit = ctx
                        .query_handle
                        .as_ref()
                        .and_then(|h| h.downcast_ref::<u32>())
                        .copied();
                    Ok(limit == Some(3))
                }),
            )
            .unwrap()
            .build();
        let ac = engine(registry, true, true).with_query_handle(Arc::new(3u32));
        ac.on_emit(&emit("read", json!({ "type": "Post" }), alice()))
            .await
            .unwrap();
    }
}
