//! Observer hooks a consumer can register on a [`Session`](crate::session::Session)
//! to react to screen and keyboard state changes as they happen, rather than
//! polling after every inbound record.

/// Notifications emitted while the outbound processor and keyboard engine
/// mutate screen state.
///
/// All methods have empty default bodies so a consumer only implements the
/// events it cares about.
pub trait ScreenObserver {
    /// The whole buffer was erased (`EW`/`EWA`/`EAU`).
    fn on_erase(&mut self) {}

    /// A write command placed data in `[start, end)`.
    fn on_write(&mut self, field_addr: Option<usize>, start: usize, end: usize) {
        let _ = (field_addr, start, end);
    }

    /// Raw data cells changed at `[start, start + len)` (finer-grained than
    /// `on_write`, useful for incremental rendering).
    fn on_data(&mut self, start: usize, len: usize) {
        let _ = (start, len);
    }

    /// A new field-attribute byte was placed at `addr` (`SF`/`SFE`).
    fn on_field_defined(&mut self, addr: usize) {
        let _ = addr;
    }

    /// The keyboard lock state changed (`true` == locked/inhibited).
    fn on_keylock_changed(&mut self, locked: bool) {
        let _ = locked;
    }

    /// The cursor moved to a new address.
    fn on_cursor_changed(&mut self, addr: usize) {
        let _ = addr;
    }

    /// An `SA`/`SFE` order introduced the first extended foreground or
    /// background color attribute this session has seen.
    fn on_extended_color_entered(&mut self) {}
}

/// A no-op observer, used as the default when a caller does not need any
/// notifications.
pub struct NullObserver;

impl ScreenObserver for NullObserver {}
</content>
