//! SunSpec device trees over Modbus
//!
//! A SunSpec device announces itself with the `SunS` marker followed by a
//! chain of models, each `[id, length, data...]`, terminated by `0xFFFF`.
//! Several logical devices may be chained behind one marker, each starting
//! with a common model (id 1). Walking the chain is expensive, so trees are
//! cached per physical connection and unit id.

use super::Connection;
use crate::error::{HestiaError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

const MARKER: [u16; 2] = [0x5375, 0x6e53];
const BASE_ADDRESSES: [u16; 3] = [40000, 0, 50000];
const END_MODEL: u16 = 0xFFFF;
const MAX_MODELS: usize = 256;

/// SunSpec point data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Int16,
    Uint16,
    Acc16,
    Enum16,
    Bitfield16,
    Sunssf,
    Int32,
    Uint32,
    Acc32,
    Enum32,
    Bitfield32,
    Float32,
    Int64,
    Uint64,
    Acc64,
    Str(u16),
}

impl PointType {
    /// Registers occupied by the point
    pub fn registers(self) -> u16 {
        match self {
            PointType::Int16
            | PointType::Uint16
            | PointType::Acc16
            | PointType::Enum16
            | PointType::Bitfield16
            | PointType::Sunssf => 1,
            PointType::Int32
            | PointType::Uint32
            | PointType::Acc32
            | PointType::Enum32
            | PointType::Bitfield32
            | PointType::Float32 => 2,
            PointType::Int64 | PointType::Uint64 | PointType::Acc64 => 4,
            PointType::Str(n) => n,
        }
    }

    fn is_scaled(self) -> bool {
        !matches!(
            self,
            PointType::Enum16
                | PointType::Enum32
                | PointType::Bitfield16
                | PointType::Bitfield32
                | PointType::Sunssf
                | PointType::Str(_)
        )
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Static point definition relative to the start of its block
#[derive(Debug, Clone, Copy)]
pub struct PointDef {
    pub name: &'static str,
    pub offset: u16,
    pub kind: PointType,
    pub sf: Option<&'static str>,
}

const fn p(name: &'static str, offset: u16, kind: PointType, sf: Option<&'static str>) -> PointDef {
    PointDef {
        name,
        offset,
        kind,
        sf,
    }
}

/// Static model layout: one fixed block and an optional repeating block
#[derive(Debug)]
pub struct ModelDef {
    pub ids: &'static [u16],
    pub fixed: &'static [PointDef],
    pub fixed_len: u16,
    pub repeating: &'static [PointDef],
    pub repeat_len: u16,
}

use PointType::*;

static COMMON: ModelDef = ModelDef {
    ids: &[1],
    fixed: &[
        p("Mn", 0, Str(16), None),
        p("Md", 16, Str(16), None),
        p("Opt", 32, Str(8), None),
        p("Vr", 40, Str(8), None),
        p("SN", 48, Str(16), None),
        p("DA", 64, Uint16, None),
    ],
    fixed_len: 66,
    repeating: &[],
    repeat_len: 0,
};

static INVERTER: ModelDef = ModelDef {
    ids: &[101, 102, 103],
    fixed: &[
        p("A", 0, Uint16, Some("A_SF")),
        p("AphA", 1, Uint16, Some("A_SF")),
        p("AphB", 2, Uint16, Some("A_SF")),
        p("AphC", 3, Uint16, Some("A_SF")),
        p("A_SF", 4, Sunssf, None),
        p("PPVphAB", 5, Uint16, Some("V_SF")),
        p("PPVphBC", 6, Uint16, Some("V_SF")),
        p("PPVphCA", 7, Uint16, Some("V_SF")),
        p("PhVphA", 8, Uint16, Some("V_SF")),
        p("PhVphB", 9, Uint16, Some("V_SF")),
        p("PhVphC", 10, Uint16, Some("V_SF")),
        p("V_SF", 11, Sunssf, None),
        p("W", 12, Int16, Some("W_SF")),
        p("W_SF", 13, Sunssf, None),
        p("Hz", 14, Uint16, Some("Hz_SF")),
        p("Hz_SF", 15, Sunssf, None),
        p("VA", 16, Int16, Some("VA_SF")),
        p("VA_SF", 17, Sunssf, None),
        p("VAr", 18, Int16, Some("VAr_SF")),
        p("VAr_SF", 19, Sunssf, None),
        p("PF", 20, Int16, Some("PF_SF")),
        p("PF_SF", 21, Sunssf, None),
        p("WH", 22, Acc32, Some("WH_SF")),
        p("WH_SF", 24, Sunssf, None),
        p("DCA", 25, Uint16, Some("DCA_SF")),
        p("DCA_SF", 26, Sunssf, None),
        p("DCV", 27, Uint16, Some("DCV_SF")),
        p("DCV_SF", 28, Sunssf, None),
        p("DCW", 29, Int16, Some("DCW_SF")),
        p("DCW_SF", 30, Sunssf, None),
        p("TmpCab", 31, Int16, Some("Tmp_SF")),
        p("TmpSnk", 32, Int16, Some("Tmp_SF")),
        p("TmpTrns", 33, Int16, Some("Tmp_SF")),
        p("TmpOt", 34, Int16, Some("Tmp_SF")),
        p("Tmp_SF", 35, Sunssf, None),
        p("St", 36, Enum16, None),
        p("StVnd", 37, Enum16, None),
        p("Evt1", 38, Bitfield32, None),
        p("Evt2", 40, Bitfield32, None),
        p("EvtVnd1", 42, Bitfield32, None),
        p("EvtVnd2", 44, Bitfield32, None),
        p("EvtVnd3", 46, Bitfield32, None),
        p("EvtVnd4", 48, Bitfield32, None),
    ],
    fixed_len: 50,
    repeating: &[],
    repeat_len: 0,
};

static INVERTER_FLOAT: ModelDef = ModelDef {
    ids: &[111, 112, 113],
    fixed: &[
        p("A", 0, Float32, None),
        p("AphA", 2, Float32, None),
        p("AphB", 4, Float32, None),
        p("AphC", 6, Float32, None),
        p("PPVphAB", 8, Float32, None),
        p("PPVphBC", 10, Float32, None),
        p("PPVphCA", 12, Float32, None),
        p("PhVphA", 14, Float32, None),
        p("PhVphB", 16, Float32, None),
        p("PhVphC", 18, Float32, None),
        p("W", 20, Float32, None),
        p("Hz", 22, Float32, None),
        p("VA", 24, Float32, None),
        p("VAr", 26, Float32, None),
        p("PF", 28, Float32, None),
        p("WH", 30, Float32, None),
        p("DCA", 32, Float32, None),
        p("DCV", 34, Float32, None),
        p("DCW", 36, Float32, None),
        p("TmpCab", 38, Float32, None),
        p("TmpSnk", 40, Float32, None),
        p("TmpTrns", 42, Float32, None),
        p("TmpOt", 44, Float32, None),
        p("St", 46, Enum16, None),
        p("StVnd", 47, Enum16, None),
        p("Evt1", 48, Bitfield32, None),
        p("Evt2", 50, Bitfield32, None),
        p("EvtVnd1", 52, Bitfield32, None),
        p("EvtVnd2", 54, Bitfield32, None),
        p("EvtVnd3", 56, Bitfield32, None),
        p("EvtVnd4", 58, Bitfield32, None),
    ],
    fixed_len: 60,
    repeating: &[],
    repeat_len: 0,
};

static CONTROLS: ModelDef = ModelDef {
    ids: &[123],
    fixed: &[
        p("Conn_WinTms", 0, Uint16, None),
        p("Conn_RvrtTms", 1, Uint16, None),
        p("Conn", 2, Enum16, None),
        p("WMaxLimPct", 3, Uint16, Some("WMaxLimPct_SF")),
        p("WMaxLimPct_WinTms", 4, Uint16, None),
        p("WMaxLimPct_RvrtTms", 5, Uint16, None),
        p("WMaxLimPct_RmpTms", 6, Uint16, None),
        p("WMaxLim_Ena", 7, Enum16, None),
        p("OutPFSet", 8, Int16, Some("OutPFSet_SF")),
        p("OutPFSet_WinTms", 9, Uint16, None),
        p("OutPFSet_RvrtTms", 10, Uint16, None),
        p("OutPFSet_RmpTms", 11, Uint16, None),
        p("OutPFSet_Ena", 12, Enum16, None),
        p("VArWMaxPct", 13, Int16, Some("VArPct_SF")),
        p("VArMaxPct", 14, Int16, Some("VArPct_SF")),
        p("VArAvalPct", 15, Int16, Some("VArPct_SF")),
        p("VArPct_WinTms", 16, Uint16, None),
        p("VArPct_RvrtTms", 17, Uint16, None),
        p("VArPct_RmpTms", 18, Uint16, None),
        p("VArPct_Mod", 19, Enum16, None),
        p("VArPct_Ena", 20, Enum16, None),
        p("WMaxLimPct_SF", 21, Sunssf, None),
        p("OutPFSet_SF", 22, Sunssf, None),
        p("VArPct_SF", 23, Sunssf, None),
    ],
    fixed_len: 24,
    repeating: &[],
    repeat_len: 0,
};

static STORAGE: ModelDef = ModelDef {
    ids: &[124],
    fixed: &[
        p("WChaMax", 0, Uint16, Some("WChaMax_SF")),
        p("WChaGra", 1, Uint16, Some("WChaDisChaGra_SF")),
        p("WDisChaGra", 2, Uint16, Some("WChaDisChaGra_SF")),
        p("StorCtl_Mod", 3, Bitfield16, None),
        p("VAChaMax", 4, Uint16, Some("VAChaMax_SF")),
        p("MinRsvPct", 5, Uint16, Some("MinRsvPct_SF")),
        p("ChaState", 6, Uint16, Some("ChaState_SF")),
        p("StorAval", 7, Uint16, Some("StorAval_SF")),
        p("InBatV", 8, Uint16, Some("InBatV_SF")),
        p("ChaSt", 9, Enum16, None),
        p("OutWRte", 10, Int16, Some("InOutWRte_SF")),
        p("InWRte", 11, Int16, Some("InOutWRte_SF")),
        p("InOutWRte_WinTms", 12, Uint16, None),
        p("InOutWRte_RvrtTms", 13, Uint16, None),
        p("InOutWRte_RmpTms", 14, Uint16, None),
        p("ChaGriSet", 15, Enum16, None),
        p("WChaMax_SF", 16, Sunssf, None),
        p("WChaDisChaGra_SF", 17, Sunssf, None),
        p("VAChaMax_SF", 18, Sunssf, None),
        p("MinRsvPct_SF", 19, Sunssf, None),
        p("ChaState_SF", 20, Sunssf, None),
        p("StorAval_SF", 21, Sunssf, None),
        p("InBatV_SF", 22, Sunssf, None),
        p("InOutWRte_SF", 23, Sunssf, None),
    ],
    fixed_len: 24,
    repeating: &[],
    repeat_len: 0,
};

static MPPT: ModelDef = ModelDef {
    ids: &[160],
    fixed: &[
        p("DCA_SF", 0, Sunssf, None),
        p("DCV_SF", 1, Sunssf, None),
        p("DCW_SF", 2, Sunssf, None),
        p("DCWH_SF", 3, Sunssf, None),
        p("Evt", 4, Bitfield32, None),
        p("N", 6, Uint16, None),
        p("TmsPer", 7, Uint16, None),
    ],
    fixed_len: 8,
    repeating: &[
        p("ID", 0, Uint16, None),
        p("IDStr", 1, Str(8), None),
        p("DCA", 9, Uint16, Some("DCA_SF")),
        p("DCV", 10, Uint16, Some("DCV_SF")),
        p("DCW", 11, Uint16, Some("DCW_SF")),
        p("DCWH", 12, Acc32, Some("DCWH_SF")),
        p("Tms", 14, Uint32, None),
        p("Tmp", 16, Int16, None),
        p("DCSt", 17, Enum16, None),
        p("DCEvt", 18, Bitfield32, None),
    ],
    repeat_len: 20,
};

static METER: ModelDef = ModelDef {
    ids: &[201, 202, 203, 204],
    fixed: &[
        p("A", 0, Int16, Some("A_SF")),
        p("AphA", 1, Int16, Some("A_SF")),
        p("AphB", 2, Int16, Some("A_SF")),
        p("AphC", 3, Int16, Some("A_SF")),
        p("A_SF", 4, Sunssf, None),
        p("PhV", 5, Int16, Some("V_SF")),
        p("PhVphA", 6, Int16, Some("V_SF")),
        p("PhVphB", 7, Int16, Some("V_SF")),
        p("PhVphC", 8, Int16, Some("V_SF")),
        p("PPV", 9, Int16, Some("V_SF")),
        p("PPVphAB", 10, Int16, Some("V_SF")),
        p("PPVphBC", 11, Int16, Some("V_SF")),
        p("PPVphCA", 12, Int16, Some("V_SF")),
        p("V_SF", 13, Sunssf, None),
        p("Hz", 14, Int16, Some("Hz_SF")),
        p("Hz_SF", 15, Sunssf, None),
        p("W", 16, Int16, Some("W_SF")),
        p("WphA", 17, Int16, Some("W_SF")),
        p("WphB", 18, Int16, Some("W_SF")),
        p("WphC", 19, Int16, Some("W_SF")),
        p("W_SF", 20, Sunssf, None),
        p("VA", 21, Int16, Some("VA_SF")),
        p("VAphA", 22, Int16, Some("VA_SF")),
        p("VAphB", 23, Int16, Some("VA_SF")),
        p("VAphC", 24, Int16, Some("VA_SF")),
        p("VA_SF", 25, Sunssf, None),
        p("VAR", 26, Int16, Some("VAR_SF")),
        p("VARphA", 27, Int16, Some("VAR_SF")),
        p("VARphB", 28, Int16, Some("VAR_SF")),
        p("VARphC", 29, Int16, Some("VAR_SF")),
        p("VAR_SF", 30, Sunssf, None),
        p("PF", 31, Int16, Some("PF_SF")),
        p("PFphA", 32, Int16, Some("PF_SF")),
        p("PFphB", 33, Int16, Some("PF_SF")),
        p("PFphC", 34, Int16, Some("PF_SF")),
        p("PF_SF", 35, Sunssf, None),
        p("TotWhExp", 36, Acc32, Some("TotWh_SF")),
        p("TotWhExpPhA", 38, Acc32, Some("TotWh_SF")),
        p("TotWhExpPhB", 40, Acc32, Some("TotWh_SF")),
        p("TotWhExpPhC", 42, Acc32, Some("TotWh_SF")),
        p("TotWhImp", 44, Acc32, Some("TotWh_SF")),
        p("TotWhImpPhA", 46, Acc32, Some("TotWh_SF")),
        p("TotWhImpPhB", 48, Acc32, Some("TotWh_SF")),
        p("TotWhImpPhC", 50, Acc32, Some("TotWh_SF")),
        p("TotWh_SF", 52, Sunssf, None),
        p("Evt", 103, Bitfield32, None),
    ],
    fixed_len: 105,
    repeating: &[],
    repeat_len: 0,
};

static METER_FLOAT: ModelDef = ModelDef {
    ids: &[211, 212, 213, 214],
    fixed: &[
        p("A", 0, Float32, None),
        p("AphA", 2, Float32, None),
        p("AphB", 4, Float32, None),
        p("AphC", 6, Float32, None),
        p("PhV", 8, Float32, None),
        p("PhVphA", 10, Float32, None),
        p("PhVphB", 12, Float32, None),
        p("PhVphC", 14, Float32, None),
        p("PPV", 16, Float32, None),
        p("PPVphAB", 18, Float32, None),
        p("PPVphBC", 20, Float32, None),
        p("PPVphCA", 22, Float32, None),
        p("Hz", 24, Float32, None),
        p("W", 26, Float32, None),
        p("WphA", 28, Float32, None),
        p("WphB", 30, Float32, None),
        p("WphC", 32, Float32, None),
        p("VA", 34, Float32, None),
        p("VAphA", 36, Float32, None),
        p("VAphB", 38, Float32, None),
        p("VAphC", 40, Float32, None),
        p("VAR", 42, Float32, None),
        p("VARphA", 44, Float32, None),
        p("VARphB", 46, Float32, None),
        p("VARphC", 48, Float32, None),
        p("PF", 50, Float32, None),
        p("PFphA", 52, Float32, None),
        p("PFphB", 54, Float32, None),
        p("PFphC", 56, Float32, None),
        p("TotWhExp", 58, Float32, None),
        p("TotWhExpPhA", 60, Float32, None),
        p("TotWhExpPhB", 62, Float32, None),
        p("TotWhExpPhC", 64, Float32, None),
        p("TotWhImp", 66, Float32, None),
        p("TotWhImpPhA", 68, Float32, None),
        p("TotWhImpPhB", 70, Float32, None),
        p("TotWhImpPhC", 72, Float32, None),
        p("Evt", 122, Bitfield32, None),
    ],
    fixed_len: 124,
    repeating: &[],
    repeat_len: 0,
};

static MODELS: [&ModelDef; 8] = [
    &COMMON,
    &INVERTER,
    &INVERTER_FLOAT,
    &CONTROLS,
    &STORAGE,
    &MPPT,
    &METER,
    &METER_FLOAT,
];

/// Built-in layout for a model id
pub fn model_def(id: u16) -> Option<&'static ModelDef> {
    MODELS.iter().copied().find(|m| m.ids.contains(&id))
}

/// A model instance found while walking the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInstance {
    pub id: u16,
    /// Address of the first data register, after id and length
    pub addr: u16,
    pub len: u16,
}

/// Models of each logical device behind one marker
pub type DeviceTree = Vec<Vec<ModelInstance>>;

/// A `model:block:point` (or `model:point`) reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRef {
    pub model: u16,
    pub block: usize,
    pub point: String,
}

impl fmt::Display for PointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.model, self.block, self.point)
    }
}

impl std::str::FromStr for PointRef {
    type Err = HestiaError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || HestiaError::config(format!("invalid sunspec value: {}", s));
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let (model, block, point) = match parts.as_slice() {
            [model, point] => (*model, "0", *point),
            [model, block, point] => (*model, *block, *point),
            _ => return Err(bad()),
        };
        if point.is_empty() {
            return Err(bad());
        }
        Ok(PointRef {
            model: model.parse().map_err(|_| bad())?,
            block: block.parse().map_err(|_| bad())?,
            point: point.to_string(),
        })
    }
}

/// A point resolved to absolute register addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPoint {
    pub addr: u16,
    pub kind: PointType,
    /// Address of the scale factor register
    pub sf: Option<u16>,
}

fn find_point<'a>(defs: &'a [PointDef], name: &str) -> Option<&'a PointDef> {
    defs.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

/// Resolve a point reference against the models of one device
pub fn resolve(models: &[ModelInstance], r: &PointRef) -> Result<ResolvedPoint> {
    let not_found = || HestiaError::config(format!("sunspec point not found: {}", r));

    let instance = models.iter().find(|m| m.id == r.model).ok_or_else(not_found)?;
    let def = model_def(r.model).ok_or_else(not_found)?;

    let (block_addr, defs) = if r.block == 0 {
        (instance.addr, def.fixed)
    } else {
        if def.repeat_len == 0 {
            return Err(not_found());
        }
        let repeats = instance.len.saturating_sub(def.fixed_len) / def.repeat_len;
        if r.block > usize::from(repeats) {
            return Err(not_found());
        }
        let offset = def.fixed_len + (r.block as u16 - 1) * def.repeat_len;
        (instance.addr + offset, def.repeating)
    };

    let point = find_point(defs, &r.point).ok_or_else(not_found)?;
    if point.offset + point.kind.registers() > instance.len {
        return Err(not_found());
    }

    // scale factors live in the same block or, for repeating blocks, the fixed block
    let sf = match point.sf {
        Some(name) => {
            let addr = match find_point(defs, name) {
                Some(sf) => block_addr + sf.offset,
                None => {
                    let sf = find_point(def.fixed, name).ok_or_else(not_found)?;
                    instance.addr + sf.offset
                }
            };
            Some(addr)
        }
        None => None,
    };

    Ok(ResolvedPoint {
        addr: block_addr + point.offset,
        kind: point.kind,
        sf,
    })
}

/// Walk the model chain of the device behind `conn`
pub async fn device_tree(conn: &Connection) -> Result<DeviceTree> {
    let mut base = None;
    for addr in BASE_ADDRESSES {
        if let Ok(regs) = conn.read_holding_registers(addr, 2).await
            && regs == MARKER
        {
            base = Some(addr);
            break;
        }
    }
    let base = base.ok_or_else(|| HestiaError::modbus("sunspec marker not found"))?;

    let mut devices = Vec::new();
    let mut current: Vec<ModelInstance> = Vec::new();
    let mut addr = base + 2;

    for _ in 0..MAX_MODELS {
        let header = match conn.read_holding_registers(addr, 2).await {
            Ok(h) if h.len() == 2 => h,
            Ok(_) => return Err(HestiaError::modbus("short sunspec model header")),
            // a device that fails mid-walk is partially opened; keep what we have
            Err(e) if !current.is_empty() || !devices.is_empty() => {
                conn.logger
                    .warn(&format!("sunspec device partially opened: {}", e));
                break;
            }
            Err(e) => return Err(e),
        };

        let (id, len) = (header[0], header[1]);
        if id == END_MODEL {
            break;
        }
        if id == 1 && !current.is_empty() {
            devices.push(std::mem::take(&mut current));
        }

        let data = addr
            .checked_add(2)
            .ok_or_else(|| HestiaError::modbus("sunspec model chain overflow"))?;
        current.push(ModelInstance { id, addr: data, len });

        addr = match data.checked_add(len) {
            Some(next) => next,
            None => break,
        };
    }

    if !current.is_empty() {
        devices.push(current);
    }
    if devices.is_empty() {
        return Err(HestiaError::modbus("sunspec device has no models"));
    }
    Ok(devices)
}

static TREES: Lazy<Mutex<HashMap<(String, u8), Arc<DeviceTree>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Device tree for `conn`, walking the device on first use
pub async fn cached_tree(conn: &Connection) -> Result<Arc<DeviceTree>> {
    let key = (conn.physical().key().to_string(), conn.slave());
    let mut trees = TREES.lock().await;
    if let Some(tree) = trees.get(&key) {
        return Ok(tree.clone());
    }

    let tree = Arc::new(device_tree(conn).await?);
    trees.insert(key, tree.clone());
    Ok(tree)
}

/// Drop the cached tree of `conn`
pub async fn forget_tree(conn: &Connection) {
    let key = (conn.physical().key().to_string(), conn.slave());
    TREES.lock().await.remove(&key);
}

fn is_nan(kind: PointType, regs: &[u16]) -> bool {
    match kind {
        PointType::Int16 | PointType::Sunssf => regs[0] == 0x8000,
        PointType::Uint16 | PointType::Enum16 | PointType::Bitfield16 => regs[0] == 0xFFFF,
        PointType::Acc16 | PointType::Acc32 | PointType::Acc64 => regs.iter().all(|r| *r == 0),
        PointType::Int32 => regs == [0x8000, 0x0000],
        PointType::Uint32 | PointType::Enum32 | PointType::Bitfield32 => {
            regs == [0xFFFF, 0xFFFF]
        }
        PointType::Int64 => regs == [0x8000, 0, 0, 0],
        PointType::Uint64 => regs.iter().all(|r| *r == 0xFFFF),
        PointType::Float32 => {
            f32::from_bits((u32::from(regs[0]) << 16) | u32::from(regs[1])).is_nan()
        }
        PointType::Str(_) => false,
    }
}

fn raw_value(kind: PointType, regs: &[u16]) -> f64 {
    let u32_at = || (u32::from(regs[0]) << 16) | u32::from(regs[1]);
    let u64_at = || {
        regs.iter()
            .take(4)
            .fold(0u64, |acc, r| (acc << 16) | u64::from(*r))
    };
    match kind {
        PointType::Int16 | PointType::Sunssf => f64::from(regs[0] as i16),
        PointType::Uint16 | PointType::Acc16 | PointType::Enum16 | PointType::Bitfield16 => {
            f64::from(regs[0])
        }
        PointType::Int32 => f64::from(u32_at() as i32),
        PointType::Uint32 | PointType::Acc32 | PointType::Enum32 | PointType::Bitfield32 => {
            f64::from(u32_at())
        }
        PointType::Float32 => f64::from(f32::from_bits(u32_at())),
        PointType::Int64 => u64_at() as i64 as f64,
        PointType::Uint64 | PointType::Acc64 => u64_at() as f64,
        PointType::Str(_) => 0.0,
    }
}

async fn scale_factor(conn: &Connection, point: &ResolvedPoint) -> Result<i32> {
    match point.sf {
        Some(addr) if point.kind.is_scaled() => {
            let regs = conn.read_holding_registers(addr, 1).await?;
            let raw = regs
                .first()
                .copied()
                .ok_or_else(|| HestiaError::modbus("short read"))?;
            if raw == 0x8000 {
                return Ok(0);
            }
            Ok(i32::from(raw as i16))
        }
        _ => Ok(0),
    }
}

/// Read a numeric point including its scale factor; NaN sentinels read as 0
pub async fn read_point(conn: &Connection, point: &ResolvedPoint) -> Result<f64> {
    if let PointType::Str(_) = point.kind {
        return Err(HestiaError::invalid(format!(
            "invalid point type: {}",
            point.kind
        )));
    }

    let regs = conn
        .read_holding_registers(point.addr, point.kind.registers())
        .await?;
    if regs.len() < usize::from(point.kind.registers()) {
        return Err(HestiaError::modbus("short read"));
    }
    if is_nan(point.kind, &regs) {
        return Ok(0.0);
    }

    let sf = scale_factor(conn, point).await?;
    let value = raw_value(point.kind, &regs) * 10f64.powi(sf);
    Ok(if value.is_finite() { value } else { 0.0 })
}

/// Read a string point
pub async fn read_string(conn: &Connection, point: &ResolvedPoint) -> Result<String> {
    let regs = conn
        .read_holding_registers(point.addr, point.kind.registers())
        .await?;
    if let PointType::Str(_) = point.kind {
        return Ok(super::register::decode_string(
            &super::register::registers_to_bytes(&regs),
        ));
    }
    if is_nan(point.kind, &regs) {
        return Ok("0".to_string());
    }
    let sf = scale_factor(conn, point).await?;
    Ok((raw_value(point.kind, &regs) * 10f64.powi(sf)).to_string())
}

/// Write an integer point; the scale factor is divided out
pub async fn write_int(conn: &Connection, point: &ResolvedPoint, value: i64) -> Result<()> {
    let sf = scale_factor(conn, point).await?;
    let raw = if sf == 0 {
        value
    } else {
        (value as f64 / 10f64.powi(sf)).round() as i64
    };

    let regs = match point.kind {
        PointType::Int16 | PointType::Uint16 | PointType::Enum16 | PointType::Bitfield16 => {
            vec![raw as u16]
        }
        PointType::Int32 | PointType::Uint32 | PointType::Enum32 | PointType::Bitfield32 => {
            let v = raw as u32;
            vec![(v >> 16) as u16, v as u16]
        }
        PointType::Int64 | PointType::Uint64 => {
            let v = raw as u64;
            vec![(v >> 48) as u16, (v >> 32) as u16, (v >> 16) as u16, v as u16]
        }
        other => {
            return Err(HestiaError::invalid(format!(
                "invalid point type: {}",
                other
            )));
        }
    };

    conn.write_multiple_registers(point.addr, regs).await
}

/// Write a float32 point
pub async fn write_float(conn: &Connection, point: &ResolvedPoint, value: f64) -> Result<()> {
    match point.kind {
        PointType::Float32 => {
            let bits = (value as f32).to_bits();
            conn.write_multiple_registers(point.addr, vec![(bits >> 16) as u16, bits as u16])
                .await
        }
        other => Err(HestiaError::invalid(format!(
            "invalid point type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<ModelInstance> {
        vec![
            ModelInstance {
                id: 1,
                addr: 40004,
                len: 66,
            },
            ModelInstance {
                id: 103,
                addr: 40072,
                len: 50,
            },
            ModelInstance {
                id: 160,
                addr: 40124,
                len: 48,
            },
        ]
    }

    #[test]
    fn test_parse_point() {
        let r: PointRef = "103:0:W".parse().unwrap();
        assert_eq!(r.model, 103);
        assert_eq!(r.block, 0);
        assert_eq!(r.point, "W");

        let r: PointRef = "160:2:DCW".parse().unwrap();
        assert_eq!(r.block, 2);

        let r: PointRef = "124:WChaMax".parse().unwrap();
        assert_eq!(r.block, 0);

        assert!("abc".parse::<PointRef>().is_err());
        assert!("103:x:W".parse::<PointRef>().is_err());
        assert!("103:0:".parse::<PointRef>().is_err());
    }

    #[test]
    fn test_resolve_fixed_block() {
        let p = resolve(&models(), &"103:0:W".parse().unwrap()).unwrap();
        assert_eq!(p.addr, 40072 + 12);
        assert_eq!(p.kind, PointType::Int16);
        assert_eq!(p.sf, Some(40072 + 13));

        let p = resolve(&models(), &"103:WH".parse().unwrap()).unwrap();
        assert_eq!(p.kind, PointType::Acc32);
        assert_eq!(p.sf, Some(40072 + 24));
    }

    #[test]
    fn test_resolve_repeating_block() {
        // second string of the MPPT model, scale factor from the fixed block
        let p = resolve(&models(), &"160:2:DCW".parse().unwrap()).unwrap();
        assert_eq!(p.addr, 40124 + 8 + 20 + 11);
        assert_eq!(p.sf, Some(40124 + 2));

        assert!(resolve(&models(), &"160:3:DCW".parse().unwrap()).is_err());
    }

    #[test]
    fn test_resolve_missing() {
        assert!(resolve(&models(), &"201:0:W".parse().unwrap()).is_err());
        assert!(resolve(&models(), &"103:0:Foo".parse().unwrap()).is_err());
        assert!(resolve(&models(), &"103:1:W".parse().unwrap()).is_err());
    }

    #[test]
    fn test_model_defs_are_consistent() {
        for def in MODELS.iter() {
            for p in def.fixed {
                assert!(p.offset + p.kind.registers() <= def.fixed_len, "{}", p.name);
                if let Some(sf) = p.sf {
                    assert!(find_point(def.fixed, sf).is_some(), "{}", sf);
                }
            }
            for p in def.repeating {
                assert!(p.offset + p.kind.registers() <= def.repeat_len, "{}", p.name);
            }
        }
    }

    #[test]
    fn test_nan_and_raw() {
        assert!(is_nan(PointType::Int16, &[0x8000]));
        assert!(is_nan(PointType::Acc32, &[0, 0]));
        assert!(!is_nan(PointType::Uint16, &[1]));
        assert_eq!(raw_value(PointType::Int16, &[0xFFFE]), -2.0);
        assert_eq!(raw_value(PointType::Acc32, &[0x0001, 0x0000]), 65536.0);
        assert_eq!(raw_value(PointType::Float32, &[0x3F80, 0x0000]), 1.0);
    }
}
