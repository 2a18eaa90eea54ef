//! Driver-level enforcement point: wraps the transaction-begin call of the lowest layer
//! that can open database work, so callers that bypass the hook and interceptor are still
//! rejected once shutdown has begun.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LifecycleError;
use crate::gate::{Gate, GatePath};
use crate::inflight::InFlightGuard;

/// A backend able to open transactions.
#[async_trait]
pub trait Driver: Send + Sync {
    type Tx: Transaction<Error = Self::Error>;
    type Error: From<LifecycleError> + Send;

    /// Capability check performed once, when the driver is wrapped.
    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin_tx(&self) -> Result<Self::Tx, Self::Error>;
}

#[async_trait]
pub trait Transaction: Send + Sized {
    type Error: Send;

    async fn commit(self) -> Result<(), Self::Error>;

    async fn rollback(self) -> Result<(), Self::Error>;
}

/// A shared client the drain routine can inspect and release.
#[async_trait]
pub trait Close: Send + Sync {
    type Error: Send;

    /// Connections currently checked out, as reported by the client's own accounting.
    /// Clients without such accounting rely on the gate's in-flight counter alone.
    fn in_use(&self) -> usize {
        0
    }

    /// Release the client. Must tolerate being called more than once.
    async fn close(&self) -> Result<(), Self::Error>;
}

#[async_trait]
impl<C: Close + ?Sized> Close for Arc<C> {
    type Error = C::Error;

    fn in_use(&self) -> usize {
        (**self).in_use()
    }

    async fn close(&self) -> Result<(), Self::Error> {
        (**self).close().await
    }
}

/// A [`Driver`] whose `begin_tx` consults the admission gate first.
#[derive(Debug)]
pub struct GatedDriver<D> {
    inner: D,
    gate: Gate,
}

impl<D: Driver> GatedDriver<D> {
    /// Wrap `inner`; fails if it cannot open transactions at all.
    pub fn new(inner: D, gate: Gate) -> Result<Self, LifecycleError> {
        if !inner.supports_transactions() {
            return Err(LifecycleError::DriverLackingBeginTx);
        }
        Ok(Self { inner, gate })
    }

    /// Open a transaction unless shutdown has begun. The returned transaction counts as
    /// in-flight work until it is committed, rolled back or dropped.
    ///
    /// Called from a request already admitted by an [`AdmissionLayer`](crate::AdmissionLayer)
    /// on the same gate, the transaction is opened even after shutdown has begun.
    pub async fn begin_tx(&self) -> Result<GatedTx<D::Tx>, D::Error> {
        let guard = self.gate.admit_nested(GatePath::Driver)?;
        let tx = self.inner.begin_tx().await?;
        Ok(GatedTx { tx, _guard: guard })
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

#[async_trait]
impl<D: Close> Close for GatedDriver<D> {
    type Error = D::Error;

    fn in_use(&self) -> usize {
        self.inner.in_use()
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.inner.close().await
    }
}

/// Transaction opened through a [`GatedDriver`]. Derefs to the driver's transaction type.
#[derive(Debug)]
pub struct GatedTx<T> {
    tx: T,
    _guard: InFlightGuard,
}

impl<T: Transaction> GatedTx<T> {
    pub async fn commit(self) -> Result<(), T::Error> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), T::Error> {
        self.tx.rollback().await
    }
}

impl<T> Deref for GatedTx<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.tx
    }
}

impl<T> DerefMut for GatedTx<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.tx
    }
}
