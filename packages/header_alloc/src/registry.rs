//! Installing tracking allocators into a host's allocator registry.

use crate::{AllocatorFunctions, SyncTrackingAllocator, TrackingAllocator};

/// An allocator domain of the host, each of which can have its own allocator installed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum AllocatorDomain {
    /// Raw memory requests that may be issued without any host-level lock held.
    Raw,

    /// General-purpose memory requests issued by the host.
    Mem,

    /// Memory for host-level objects.
    Object,
}

/// The host mechanism through which allocator implementations are looked up and replaced.
///
/// Implemented by the embedding application on top of whatever registration API its runtime
/// offers. Replacing an allocator takes effect for all subsequent allocation traffic in that
/// domain.
pub trait AllocatorRegistry {
    /// Returns the allocator currently active for `domain`.
    fn get_allocator(&self, domain: AllocatorDomain) -> AllocatorFunctions;

    /// Makes `allocator` the active allocator for `domain`.
    fn set_allocator(&mut self, domain: AllocatorDomain, allocator: AllocatorFunctions);
}

/// Wraps the allocator currently registered for `domain` in a [`TrackingAllocator`] and
/// registers the tracking allocator in its place.
///
/// The tracking allocator lives until the process terminates. The returned reference can be
/// used to read its allocated byte count.
///
/// # Safety
///
/// The domain must not have any live blocks at the time of the call: every block released
/// through the domain afterwards is assumed to carry a header, so releasing a block that the
/// previous allocator handed out is undefined behavior.
///
/// The host must not call into the installed allocator from more than one thread at a time.
///
/// # Panics
///
/// The installed allocator panics under the conditions listed on [`TrackingAllocator::free()`].
/// Because the host reaches it through `extern "C"` entry points, such a panic aborts the
/// process.
pub unsafe fn install<R>(
    registry: &mut R,
    domain: AllocatorDomain,
) -> &'static TrackingAllocator<AllocatorFunctions>
where
    R: AllocatorRegistry + ?Sized,
{
    let underlying = registry.get_allocator(domain);

    let shim: &'static TrackingAllocator<AllocatorFunctions> =
        Box::leak(Box::new(TrackingAllocator::new(underlying)));

    // SAFETY: The caller guarantees that the host serializes calls into the domain.
    let functions = unsafe { AllocatorFunctions::from_static_unsynchronized(shim) };
    registry.set_allocator(domain, functions);

    tracing::debug!(
        ?domain,
        underlying_ctx = ?underlying.ctx(),
        "installed size-tracking allocator"
    );

    shim
}

/// Wraps the allocator currently registered for `domain` in a [`SyncTrackingAllocator`] and
/// registers the tracking allocator in its place.
///
/// Unlike [`install()`], the installed allocator may be called from any number of threads
/// concurrently, and the returned reference may be shared with other threads to observe the
/// allocated byte count.
///
/// # Panics
///
/// As with [`install()`], a panic inside the installed allocator aborts the process.
///
/// # Safety
///
/// The domain must not have any live blocks at the time of the call: every block released
/// through the domain afterwards is assumed to carry a header, so releasing a block that the
/// previous allocator handed out is undefined behavior.
pub unsafe fn install_synchronized<R>(
    registry: &mut R,
    domain: AllocatorDomain,
) -> &'static SyncTrackingAllocator<AllocatorFunctions>
where
    R: AllocatorRegistry + ?Sized,
{
    let underlying = registry.get_allocator(domain);

    let shim: &'static SyncTrackingAllocator<AllocatorFunctions> =
        Box::leak(Box::new(SyncTrackingAllocator::new(underlying)));

    registry.set_allocator(domain, AllocatorFunctions::from_static(shim));

    tracing::debug!(
        ?domain,
        underlying_ctx = ?underlying.ctx(),
        "installed synchronized size-tracking allocator"
    );

    shim
}
