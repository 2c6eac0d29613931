//! Remote rule-ordering collaborator.
//!
//! The engine never talks HTTP itself. Every registration carries a handle
//! to something that can count the rules of its resource type and push one
//! rule's absolute order; the reconciler calls it without holding any lock.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{OrderRule, RuleId};

/// Remote rule-ordering API contract.
///
/// Implementations must be object-safe and `Send + Sync`: the engine holds
/// them as `Arc<dyn RuleOrderApi>` inside ticker tasks.
#[async_trait]
pub trait RuleOrderApi: Send + Sync {
    /// Current total number of rules for the resource type.
    async fn rule_count(&self) -> Result<u32, ApiError>;

    /// Set the absolute order of one rule.
    async fn set_order(&self, rule_id: RuleId, order: OrderRule) -> Result<(), ApiError>;
}

/// Adapter for callers that hold two closures instead of a client type.
pub struct FnRuleOrderApi<C, CF, U, UF> {
    count: C,
    update: U,
    _fut: PhantomData<fn() -> (CF, UF)>,
}

impl<C, CF, U, UF> FnRuleOrderApi<C, CF, U, UF>
where
    C: Fn() -> CF + Send + Sync,
    CF: Future<Output = Result<u32, ApiError>> + Send,
    U: Fn(RuleId, OrderRule) -> UF + Send + Sync,
    UF: Future<Output = Result<(), ApiError>> + Send,
{
    pub fn new(count: C, update: U) -> Self {
        Self {
            count,
            update,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<C, CF, U, UF> RuleOrderApi for FnRuleOrderApi<C, CF, U, UF>
where
    C: Fn() -> CF + Send + Sync,
    CF: Future<Output = Result<u32, ApiError>> + Send,
    U: Fn(RuleId, OrderRule) -> UF + Send + Sync,
    UF: Future<Output = Result<(), ApiError>> + Send,
{
    async fn rule_count(&self) -> Result<u32, ApiError> {
        (self.count)().await
    }

    async fn set_order(&self, rule_id: RuleId, order: OrderRule) -> Result<(), ApiError> {
        (self.update)(rule_id, order).await
    }
}
