//! Host events delivered to the controller and registry

use crate::host::{AttrHandle, ConnHandle};
use uuid::Uuid;

/// Security-manager IO action requested during pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeyAction {
    None,
    Oob,
    /// Peer displays, we must type
    Input,
    /// We display, peer must type
    Display,
    /// Both sides show this value and confirm
    NumericComparison(u32),
    OobSc,
}

impl PasskeyAction {
    /// Decode a raw IO action code; `numcmp` is only used for numeric comparison
    pub fn from_raw(action: u8, numcmp: u32) -> Option<Self> {
        match action {
            0 => Some(PasskeyAction::None),
            1 => Some(PasskeyAction::Oob),
            2 => Some(PasskeyAction::Input),
            3 => Some(PasskeyAction::Display),
            4 => Some(PasskeyAction::NumericComparison(numcmp)),
            5 => Some(PasskeyAction::OobSc),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> u8 {
        match self {
            PasskeyAction::None => 0,
            PasskeyAction::Oob => 1,
            PasskeyAction::Input => 2,
            PasskeyAction::Display => 3,
            PasskeyAction::NumericComparison(_) => 4,
            PasskeyAction::OobSc => 5,
        }
    }
}

/// GAP event reported by the host
///
/// Status and reason codes are the host's raw values; zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapEvent {
    /// A new connection was established or a connection attempt failed
    Connect { status: i32, conn_handle: ConnHandle },
    Disconnect { reason: i32, conn_handle: ConnHandle },
    ConnUpdate { status: i32, conn_handle: ConnHandle },
    AdvComplete { reason: i32 },
    EncChange { status: i32, conn_handle: ConnHandle },
    Subscribe {
        conn_handle: ConnHandle,
        attr_handle: AttrHandle,
        cur_notify: bool,
        cur_indicate: bool,
    },
    Mtu { conn_handle: ConnHandle, channel_id: u16, value: u16 },
    PasskeyAction { conn_handle: ConnHandle, action: PasskeyAction },
    /// Anything the controller does not react to
    Other { event_type: u8 },
}

/// Attribute operation carried by an access event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp<'a> {
    ReadChr,
    WriteChr(&'a [u8]),
    ReadDsc,
    WriteDsc(&'a [u8]),
}

/// Read or write on an attribute registered by this peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessEvent<'a> {
    pub conn_handle: ConnHandle,
    pub attr_handle: AttrHandle,
    /// UUID of the characteristic being accessed
    pub uuid: Uuid,
    pub op: AccessOp<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passkey_action_codes() {
        for raw in 0..=5u8 {
            let action = PasskeyAction::from_raw(raw, 7).unwrap();
            assert_eq!(action.as_raw(), raw);
        }
        assert_eq!(PasskeyAction::from_raw(3, 0), Some(PasskeyAction::Display));
        assert_eq!(
            PasskeyAction::from_raw(4, 123),
            Some(PasskeyAction::NumericComparison(123))
        );
        assert_eq!(PasskeyAction::from_raw(6, 0), None);
    }
}
