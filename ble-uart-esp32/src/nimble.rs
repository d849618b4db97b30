//! NimBLE host binding
//!
//! Implements [`BleHost`] on top of the raw NimBLE C API and forwards host
//! callbacks to the bound [`Controller`]. NimBLE keeps pointers into the
//! service table for the lifetime of the program, so the table is leaked.

use ble_uart::adv::TxPower;
use ble_uart::gatt::{CharacteristicDef, ServiceDef};
use ble_uart::host::{AdvDuration, AdvParams, ConnDesc, ConnMode, DiscMode};
use ble_uart::{
    AccessEvent, AccessOp, AdvFields, AttrHandle, BleHost, ConnHandle, Controller, GapEvent,
    HostError, OwnAddrType, PairingPolicy, PasskeyAction,
};
use esp_idf_svc::sys;
use log::*;
use std::ffi::{c_int, c_void, CString};
use std::ptr;
use std::sync::OnceLock;
use uuid::Uuid;

static CONTROLLER: OnceLock<Controller<NimbleHost>> = OnceLock::new();

/// Route host callbacks to `controller`; only the first binding counts
pub fn bind(controller: Controller<NimbleHost>) {
    if CONTROLLER.set(controller).is_err() {
        warn!("NimBLE callbacks already bound");
    }
}

fn controller() -> Option<&'static Controller<NimbleHost>> {
    CONTROLLER.get()
}

/// Service table handed to NimBLE, built once and never freed
struct ServiceTable(*const sys::ble_gatt_svc_def);

// SAFETY: the table is leaked and never written after construction
unsafe impl Send for ServiceTable {}
unsafe impl Sync for ServiceTable {}

pub struct NimbleHost {
    table: OnceLock<ServiceTable>,
}

impl NimbleHost {
    /// Bring up the controller, the host port and the GAP/GATT services
    pub fn new() -> Result<Self, HostError> {
        // SAFETY: called once from the main task before the host task exists
        unsafe {
            HostError::check(sys::nimble_port_init())?;

            let cfg = &raw mut sys::ble_hs_cfg;
            (*cfg).reset_cb = Some(on_reset);
            (*cfg).sync_cb = Some(on_sync);

            sys::ble_svc_gap_init();
            sys::ble_svc_gatt_init();
        }
        Ok(Self { table: OnceLock::new() })
    }

    /// Counting and adding must see the same table; later calls reuse the first one
    fn service_table(&self, services: &[ServiceDef]) -> *const sys::ble_gatt_svc_def {
        self.table
            .get_or_init(|| ServiceTable(leak_service_table(services)))
            .0
    }
}

impl BleHost for NimbleHost {
    fn configure_security(&self, policy: &PairingPolicy) -> Result<(), HostError> {
        // SAFETY: the host task is not running yet
        unsafe {
            let cfg = &raw mut sys::ble_hs_cfg;
            (*cfg).sm_io_cap = policy.io_capability.as_raw();
            (*cfg).set_sm_bonding(policy.bonding as _);
            (*cfg).set_sm_mitm(policy.mitm as _);
            (*cfg).set_sm_sc(policy.secure_connections as _);
        }
        Ok(())
    }

    fn count_services(&self, services: &[ServiceDef]) -> Result<(), HostError> {
        HostError::check(unsafe { sys::ble_gatts_count_cfg(self.service_table(services)) })
    }

    fn add_services(&self, services: &[ServiceDef]) -> Result<(), HostError> {
        HostError::check(unsafe { sys::ble_gatts_add_svcs(self.service_table(services)) })
    }

    fn find_characteristic(&self, service: &Uuid, characteristic: &Uuid)
        -> Result<AttrHandle, HostError> {
        let service = uuid128(service);
        let characteristic = uuid128(characteristic);
        let mut val_handle = 0u16;
        HostError::check(unsafe {
            sys::ble_gatts_find_chr(&service.u, &characteristic.u, ptr::null_mut(), &mut val_handle)
        })?;
        Ok(AttrHandle(val_handle))
    }

    fn set_device_name(&self, name: &str) -> Result<(), HostError> {
        let name = CString::new(name).map_err(|_| HostError(sys::BLE_HS_EINVAL as i32))?;
        HostError::check(unsafe { sys::ble_svc_gap_device_name_set(name.as_ptr()) })
    }

    fn set_preferred_mtu(&self, mtu: u16) -> Result<(), HostError> {
        HostError::check(unsafe { sys::ble_att_set_preferred_mtu(mtu) })
    }

    fn ensure_address(&self) -> Result<(), HostError> {
        HostError::check(unsafe { sys::ble_hs_util_ensure_addr(0) })
    }

    fn infer_address_type(&self) -> Result<OwnAddrType, HostError> {
        let mut raw = 0u8;
        HostError::check(unsafe { sys::ble_hs_id_infer_auto(0, &mut raw) })?;
        OwnAddrType::from_raw(raw).ok_or(HostError(sys::BLE_HS_EUNKNOWN as i32))
    }

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError> {
        let uuids16: Vec<sys::ble_uuid16_t> = fields
            .uuids16
            .iter()
            .map(|value| sys::ble_uuid16_t {
                u: sys::ble_uuid_t { type_: sys::BLE_UUID_TYPE_16 as u8 },
                value: *value,
            })
            .collect();

        // SAFETY: all-zero is the "field absent" encoding for every member
        let mut raw: sys::ble_hs_adv_fields = unsafe { std::mem::zeroed() };
        raw.flags = fields.flags;

        if let Some(tx_power) = fields.tx_power {
            raw.set_tx_pwr_lvl_is_present(1);
            raw.tx_pwr_lvl = match tx_power {
                TxPower::Auto => sys::BLE_HS_ADV_TX_PWR_LVL_AUTO as i8,
                TxPower::Dbm(dbm) => dbm,
            };
        }

        if let Some(name) = &fields.name {
            raw.name = name.as_ptr();
            raw.name_len = name.len() as u8;
            raw.set_name_is_complete(fields.name_complete as _);
        }

        if !uuids16.is_empty() {
            raw.uuids16 = uuids16.as_ptr();
            raw.num_uuids16 = uuids16.len() as u8;
            raw.set_uuids16_is_complete(fields.uuids16_complete as _);
        }

        // The host copies the encoded payload, borrowed buffers may go
        HostError::check(unsafe { sys::ble_gap_adv_set_fields(&raw) })
    }

    fn start_advertising(&self, own_addr_type: OwnAddrType, params: &AdvParams)
        -> Result<(), HostError> {
        let mut raw: sys::ble_gap_adv_params = unsafe { std::mem::zeroed() };
        raw.conn_mode = match params.conn_mode {
            ConnMode::NonConnectable => sys::BLE_GAP_CONN_MODE_NON,
            ConnMode::Directed => sys::BLE_GAP_CONN_MODE_DIR,
            ConnMode::Undirected => sys::BLE_GAP_CONN_MODE_UND,
        } as u8;
        raw.disc_mode = match params.disc_mode {
            DiscMode::NonDiscoverable => sys::BLE_GAP_DISC_MODE_NON,
            DiscMode::Limited => sys::BLE_GAP_DISC_MODE_LTD,
            DiscMode::General => sys::BLE_GAP_DISC_MODE_GEN,
        } as u8;
        let duration_ms = match params.duration {
            AdvDuration::Forever => sys::BLE_HS_FOREVER as i32,
            AdvDuration::Millis(ms) => ms.min(i32::MAX as u32) as i32,
        };

        HostError::check(unsafe {
            sys::ble_gap_adv_start(
                own_addr_type.as_raw(),
                ptr::null(),
                duration_ms,
                &raw,
                Some(on_gap_event),
                ptr::null_mut(),
            )
        })
    }

    fn find_connection(&self, conn: ConnHandle) -> Result<ConnDesc, HostError> {
        let mut desc: sys::ble_gap_conn_desc = unsafe { std::mem::zeroed() };
        HostError::check(unsafe { sys::ble_gap_conn_find(conn.0, &mut desc) })?;
        Ok(ConnDesc {
            conn_handle: ConnHandle(desc.conn_handle),
            encrypted: desc.sec_state.encrypted() != 0,
            authenticated: desc.sec_state.authenticated() != 0,
            bonded: desc.sec_state.bonded() != 0,
        })
    }

    fn inject_passkey(&self, conn: ConnHandle, action: PasskeyAction, passkey: u32)
        -> Result<(), HostError> {
        let mut io: sys::ble_sm_io = unsafe { std::mem::zeroed() };
        io.action = action.as_raw();
        match action {
            PasskeyAction::NumericComparison(_) => io.__bindgen_anon_1.numcmp_accept = 1,
            _ => io.__bindgen_anon_1.passkey = passkey,
        }
        HostError::check(unsafe { sys::ble_sm_inject_io(conn.0, &mut io) })
    }

    fn notify(&self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        let len = u16::try_from(data.len()).map_err(|_| HostError(sys::BLE_HS_EMSGSIZE as i32))?;
        let om = unsafe { sys::ble_hs_mbuf_from_flat(data.as_ptr() as *const c_void, len) };
        if om.is_null() {
            return Err(HostError(sys::BLE_HS_ENOMEM as i32));
        }
        // the host takes ownership of `om`, also on failure
        HostError::check(unsafe { sys::ble_gattc_notify_custom(conn.0, attr.0, om) })
    }

    fn start(&self) -> Result<(), HostError> {
        unsafe { sys::nimble_port_freertos_init(Some(host_task)) };
        Ok(())
    }
}

/// Service table in the host's layout, zero-terminated at both levels
fn leak_service_table(services: &[ServiceDef]) -> *const sys::ble_gatt_svc_def {
    let mut svcs: Vec<sys::ble_gatt_svc_def> = services
        .iter()
        .map(|service| {
            let chrs: Vec<sys::ble_gatt_chr_def> = service
                .characteristics
                .iter()
                .map(chr_def)
                .chain(std::iter::once(unsafe { std::mem::zeroed() }))
                .collect();

            // SAFETY: zero is the host's "unset" for every remaining member
            let mut svc: sys::ble_gatt_svc_def = unsafe { std::mem::zeroed() };
            svc.type_ = if service.primary {
                sys::BLE_GATT_SVC_TYPE_PRIMARY
            } else {
                sys::BLE_GATT_SVC_TYPE_SECONDARY
            } as u8;
            svc.uuid = &Box::leak(Box::new(uuid128(&service.uuid))).u;
            svc.characteristics = Box::leak(chrs.into_boxed_slice()).as_ptr();
            svc
        })
        .collect();
    svcs.push(unsafe { std::mem::zeroed() });

    Box::leak(svcs.into_boxed_slice()).as_ptr()
}

fn chr_def(chr: &CharacteristicDef) -> sys::ble_gatt_chr_def {
    let mut def: sys::ble_gatt_chr_def = unsafe { std::mem::zeroed() };
    def.uuid = &Box::leak(Box::new(uuid128(&chr.uuid))).u;
    def.access_cb = Some(on_access);
    def.flags = chr.flags.bits() as _;
    def
}

/// NimBLE stores 128-bit UUIDs little endian
fn uuid128(uuid: &Uuid) -> sys::ble_uuid128_t {
    let mut value = *uuid.as_bytes();
    value.reverse();
    sys::ble_uuid128_t {
        u: sys::ble_uuid_t { type_: sys::BLE_UUID_TYPE_128 as u8 },
        value,
    }
}

unsafe fn uuid_from_raw(uuid: *const sys::ble_uuid_t) -> Uuid {
    if uuid.is_null() || (*uuid).type_ != sys::BLE_UUID_TYPE_128 as u8 {
        return Uuid::nil();
    }
    let mut bytes = (*(uuid as *const sys::ble_uuid128_t)).value;
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

unsafe extern "C" fn host_task(_param: *mut c_void) {
    info!("BLE Host Task Started");
    // returns only once nimble_port_stop() ran
    sys::nimble_port_run();
    sys::nimble_port_freertos_deinit();
}

unsafe extern "C" fn on_reset(reason: c_int) {
    if let Some(controller) = controller() {
        controller.on_reset(reason);
    }
}

unsafe extern "C" fn on_sync() {
    match controller() {
        Some(controller) => controller.on_sync(),
        None => error!("Host synced before a controller was bound"),
    }
}

unsafe extern "C" fn on_gap_event(event: *mut sys::ble_gap_event, _arg: *mut c_void) -> c_int {
    let Some(event) = event.as_ref() else {
        return 0;
    };
    if let Some(controller) = controller() {
        controller.handle_gap_event(&gap_event(event));
    }
    0
}

unsafe fn gap_event(event: &sys::ble_gap_event) -> GapEvent {
    let data = &event.__bindgen_anon_1;
    match event.type_ as u32 {
        sys::BLE_GAP_EVENT_CONNECT => GapEvent::Connect {
            status: data.connect.status,
            conn_handle: ConnHandle(data.connect.conn_handle),
        },
        sys::BLE_GAP_EVENT_DISCONNECT => GapEvent::Disconnect {
            reason: data.disconnect.reason,
            conn_handle: ConnHandle(data.disconnect.conn.conn_handle),
        },
        sys::BLE_GAP_EVENT_CONN_UPDATE => GapEvent::ConnUpdate {
            status: data.conn_update.status,
            conn_handle: ConnHandle(data.conn_update.conn_handle),
        },
        sys::BLE_GAP_EVENT_ADV_COMPLETE => GapEvent::AdvComplete {
            reason: data.adv_complete.reason,
        },
        sys::BLE_GAP_EVENT_ENC_CHANGE => GapEvent::EncChange {
            status: data.enc_change.status,
            conn_handle: ConnHandle(data.enc_change.conn_handle),
        },
        sys::BLE_GAP_EVENT_SUBSCRIBE => GapEvent::Subscribe {
            conn_handle: ConnHandle(data.subscribe.conn_handle),
            attr_handle: AttrHandle(data.subscribe.attr_handle),
            cur_notify: data.subscribe.cur_notify() != 0,
            cur_indicate: data.subscribe.cur_indicate() != 0,
        },
        sys::BLE_GAP_EVENT_MTU => GapEvent::Mtu {
            conn_handle: ConnHandle(data.mtu.conn_handle),
            channel_id: data.mtu.channel_id,
            value: data.mtu.value,
        },
        sys::BLE_GAP_EVENT_PASSKEY_ACTION => {
            let params = data.passkey.params;
            match PasskeyAction::from_raw(params.action, params.numcmp) {
                Some(action) => GapEvent::PasskeyAction {
                    conn_handle: ConnHandle(data.passkey.conn_handle),
                    action,
                },
                None => GapEvent::Other { event_type: event.type_ },
            }
        }
        _ => GapEvent::Other { event_type: event.type_ },
    }
}

unsafe extern "C" fn on_access(
    conn_handle: u16,
    attr_handle: u16,
    ctxt: *mut sys::ble_gatt_access_ctxt,
    _arg: *mut c_void,
) -> c_int {
    let Some(ctxt) = ctxt.as_ref() else {
        return sys::BLE_ATT_ERR_UNLIKELY as c_int;
    };
    let Some(controller) = controller() else {
        return 0;
    };

    let (uuid, is_chr) = match ctxt.op as u32 {
        sys::BLE_GATT_ACCESS_OP_READ_CHR | sys::BLE_GATT_ACCESS_OP_WRITE_CHR => {
            (uuid_from_raw((*ctxt.__bindgen_anon_1.chr).uuid), true)
        }
        _ => (uuid_from_raw((*ctxt.__bindgen_anon_1.dsc).uuid), false),
    };

    let mut buf = Vec::new();
    let op = match ctxt.op as u32 {
        sys::BLE_GATT_ACCESS_OP_WRITE_CHR | sys::BLE_GATT_ACCESS_OP_WRITE_DSC => {
            let len = sys::os_mbuf_len(ctxt.om);
            buf.resize(len as usize, 0u8);
            let mut copied = 0u16;
            let rc = sys::ble_hs_mbuf_to_flat(ctxt.om, buf.as_mut_ptr() as *mut c_void, len, &mut copied);
            if rc != 0 {
                return sys::BLE_ATT_ERR_UNLIKELY as c_int;
            }
            buf.truncate(copied as usize);
            if is_chr { AccessOp::WriteChr(&buf) } else { AccessOp::WriteDsc(&buf) }
        }
        _ if is_chr => AccessOp::ReadChr,
        _ => AccessOp::ReadDsc,
    };

    let event = AccessEvent {
        conn_handle: ConnHandle(conn_handle),
        attr_handle: AttrHandle(attr_handle),
        uuid,
        op,
    };
    match controller.handle_access(&event) {
        Ok(()) => 0,
        Err(e) => e.code() as c_int,
    }
}
