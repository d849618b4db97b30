//! Recording host used by the unit tests

use crate::adv::AdvFields;
use crate::config::{MAX_MTU, MIN_MTU, PairingPolicy};
use crate::event::PasskeyAction;
use crate::gatt::{ServiceDef, RX_CHARACTERISTIC_UUID, TX_CHARACTERISTIC_UUID};
use crate::host::{AdvParams, AttrHandle, BleHost, ConnDesc, ConnHandle, HostError, OwnAddrType};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub const RX_HANDLE: AttrHandle = AttrHandle(0x0010);
pub const TX_HANDLE: AttrHandle = AttrHandle(0x0012);

// NimBLE return codes the mock imitates
pub const EINVAL: i32 = 3;
pub const EMSGSIZE: i32 = 4;
pub const ENOENT: i32 = 5;
pub const ENOMEM: i32 = 6;
pub const ENOTCONN: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ConfigureSecurity,
    CountServices,
    AddServices,
    FindCharacteristic,
    SetDeviceName,
    SetPreferredMtu,
    EnsureAddress,
    InferAddressType,
    SetAdvFields,
    StartAdvertising,
    FindConnection,
    InjectPasskey,
    Notify,
    Start,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ConfigureSecurity(PairingPolicy),
    CountServices(Vec<ServiceDef>),
    AddServices(Vec<ServiceDef>),
    FindCharacteristic(Uuid),
    SetDeviceName(String),
    SetPreferredMtu(u16),
    EnsureAddress,
    InferAddressType,
    SetAdvFields(AdvFields),
    StartAdvertising(OwnAddrType, AdvParams),
    FindConnection(ConnHandle),
    InjectPasskey(ConnHandle, PasskeyAction, u32),
    Notify(ConnHandle, AttrHandle, Vec<u8>),
    Start,
}

impl HostCall {
    pub fn op(&self) -> Op {
        match self {
            HostCall::ConfigureSecurity(_) => Op::ConfigureSecurity,
            HostCall::CountServices(_) => Op::CountServices,
            HostCall::AddServices(_) => Op::AddServices,
            HostCall::FindCharacteristic(_) => Op::FindCharacteristic,
            HostCall::SetDeviceName(_) => Op::SetDeviceName,
            HostCall::SetPreferredMtu(_) => Op::SetPreferredMtu,
            HostCall::EnsureAddress => Op::EnsureAddress,
            HostCall::InferAddressType => Op::InferAddressType,
            HostCall::SetAdvFields(_) => Op::SetAdvFields,
            HostCall::StartAdvertising(..) => Op::StartAdvertising,
            HostCall::FindConnection(_) => Op::FindConnection,
            HostCall::InjectPasskey(..) => Op::InjectPasskey,
            HostCall::Notify(..) => Op::Notify,
            HostCall::Start => Op::Start,
        }
    }
}

/// Host that records every call and fails on demand
#[derive(Default)]
pub struct MockHost {
    calls: Mutex<Vec<HostCall>>,
    failures: Mutex<HashMap<Op, i32>>,
    /// Assign attribute handles only once `start()` ran, like NimBLE
    defer_handles: bool,
    started: AtomicBool,
    /// Advertising runs until a connection forms or it completes, like NimBLE
    advertising: AtomicBool,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deferred_handles() -> Self {
        Self { defer_handles: true, ..Self::default() }
    }

    /// Make every later call of `op` fail with `rc`
    pub fn fail(&self, op: Op, rc: i32) {
        self.failures.lock().unwrap().insert(op, rc);
    }

    pub fn succeed(&self, op: Op) {
        self.failures.lock().unwrap().remove(&op);
    }

    /// The radio stopped advertising (connection formed or advertising completed)
    pub fn end_advertising(&self) {
        self.advertising.store(false, Ordering::SeqCst);
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op() == op).count()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls.lock().unwrap().iter().map(HostCall::op).collect()
    }

    pub fn notifications(&self) -> Vec<(ConnHandle, AttrHandle, Vec<u8>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                HostCall::Notify(conn, attr, data) => Some((*conn, *attr, data.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) -> Result<(), HostError> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(&op) {
            Some(rc) => Err(HostError(*rc)),
            None => Ok(()),
        }
    }
}

impl BleHost for MockHost {
    fn configure_security(&self, policy: &PairingPolicy) -> Result<(), HostError> {
        self.record(HostCall::ConfigureSecurity(*policy))
    }

    fn count_services(&self, services: &[ServiceDef]) -> Result<(), HostError> {
        self.record(HostCall::CountServices(services.to_vec()))
    }

    fn add_services(&self, services: &[ServiceDef]) -> Result<(), HostError> {
        self.record(HostCall::AddServices(services.to_vec()))
    }

    fn find_characteristic(&self, _service: &Uuid, characteristic: &Uuid)
        -> Result<AttrHandle, HostError> {
        self.record(HostCall::FindCharacteristic(*characteristic))?;
        if self.defer_handles && !self.started.load(Ordering::SeqCst) {
            return Err(HostError(ENOENT));
        }
        if *characteristic == RX_CHARACTERISTIC_UUID {
            Ok(RX_HANDLE)
        } else if *characteristic == TX_CHARACTERISTIC_UUID {
            Ok(TX_HANDLE)
        } else {
            Err(HostError(ENOENT))
        }
    }

    fn set_device_name(&self, name: &str) -> Result<(), HostError> {
        self.record(HostCall::SetDeviceName(name.to_string()))
    }

    fn set_preferred_mtu(&self, mtu: u16) -> Result<(), HostError> {
        self.record(HostCall::SetPreferredMtu(mtu))?;
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(HostError(EINVAL));
        }
        Ok(())
    }

    fn ensure_address(&self) -> Result<(), HostError> {
        self.record(HostCall::EnsureAddress)
    }

    fn infer_address_type(&self) -> Result<OwnAddrType, HostError> {
        self.record(HostCall::InferAddressType)?;
        Ok(OwnAddrType::Public)
    }

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError> {
        self.record(HostCall::SetAdvFields(fields.clone()))?;
        if fields.encoded_len() > crate::adv::MAX_PAYLOAD_LEN {
            return Err(HostError(EMSGSIZE));
        }
        Ok(())
    }

    fn start_advertising(&self, own_addr_type: OwnAddrType, params: &AdvParams)
        -> Result<(), HostError> {
        self.record(HostCall::StartAdvertising(own_addr_type, *params))?;
        if self.advertising.swap(true, Ordering::SeqCst) {
            return Err(HostError(HostError::EALREADY));
        }
        Ok(())
    }

    fn find_connection(&self, conn: ConnHandle) -> Result<ConnDesc, HostError> {
        self.record(HostCall::FindConnection(conn))?;
        Ok(ConnDesc {
            conn_handle: conn,
            encrypted: true,
            authenticated: true,
            bonded: true,
        })
    }

    fn inject_passkey(&self, conn: ConnHandle, action: PasskeyAction, passkey: u32)
        -> Result<(), HostError> {
        self.record(HostCall::InjectPasskey(conn, action, passkey))
    }

    fn notify(&self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        self.record(HostCall::Notify(conn, attr, data.to_vec()))
    }

    fn start(&self) -> Result<(), HostError> {
        self.record(HostCall::Start)?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}
