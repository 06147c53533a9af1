//! BoxCapabilityProvider -- object-safe dynamic dispatch wrapper for CapabilityProvider.
//!
//! 1. Define an object-safe `CapabilityProviderDyn` trait with boxed futures
//! 2. Blanket-impl `CapabilityProviderDyn` for all `T: CapabilityProvider`
//! 3. `BoxCapabilityProvider` wraps `Box<dyn CapabilityProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use blockflow_types::capability::{CapabilityRequest, CapabilityResponse};
use blockflow_types::error::CapabilityError;

use super::provider::CapabilityProvider;

/// Object-safe version of [`CapabilityProvider`] with boxed futures.
pub trait CapabilityProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, capability: &str) -> bool;

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a CapabilityRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CapabilityResponse, CapabilityError>> + Send + 'a>>;
}

impl<T: CapabilityProvider> CapabilityProviderDyn for T {
    fn name(&self) -> &str {
        CapabilityProvider::name(self)
    }

    fn supports(&self, capability: &str) -> bool {
        CapabilityProvider::supports(self, capability)
    }

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a CapabilityRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CapabilityResponse, CapabilityError>> + Send + 'a>>
    {
        Box::pin(self.invoke(request))
    }
}

/// Type-erased capability provider selected at startup (HTTP backend vs. echo).
///
/// Since `CapabilityProvider` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxCapabilityProvider` provides equivalent methods that
/// delegate to the inner `CapabilityProviderDyn` trait object.
pub struct BoxCapabilityProvider {
    inner: Box<dyn CapabilityProviderDyn + Send + Sync>,
}

impl BoxCapabilityProvider {
    /// Wrap a concrete `CapabilityProvider` in a type-erased box.
    pub fn new<T: CapabilityProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.inner.supports(capability)
    }

    /// Perform one invocation.
    pub async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        self.inner.invoke_boxed(request).await
    }
}

impl std::fmt::Debug for BoxCapabilityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCapabilityProvider")
            .field("name", &self.inner.name())
            .finish()
    }
}
