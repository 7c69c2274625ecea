//! Fixed binary layouts of the four frame kinds.
//!
//! Every frame is little-endian and packed, and ends with the same
//! 8-byte time block followed by a one-byte flag. A payload decodes only
//! when its length equals [`Layout::width`] exactly.

use std::sync::OnceLock;

use pqgate_core::MessageKind;

/// Primitive wire types used by the layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    U8,
    U16,
    U32,
    F32,
    Bool,
}

impl Primitive {
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::Bool => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

/// One named value in a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub primitive: Primitive,
}

impl Entry {
    fn new(name: impl Into<String>, primitive: Primitive) -> Self {
        Self {
            name: name.into(),
            primitive,
        }
    }
}

/// Names of the trailing time block, in wire order.
pub const TIME_FIELDS: [&str; 7] = [
    "seconds", "minutes", "hours", "weekday", "date", "month", "year",
];

/// Byte width of the time block (six `u8` and one `u16`).
pub const TIME_BLOCK_WIDTH: usize = 8;

/// Name of the trailing flag.
pub const FLAG_FIELD: &str = "IsNlf";

/// Immutable description of one frame kind.
#[derive(Debug, Clone)]
pub struct Layout {
    kind: MessageKind,
    entries: Vec<Entry>,
    expose_time: bool,
    width: usize,
}

impl Layout {
    fn new(kind: MessageKind, entries: Vec<Entry>, expose_time: bool) -> Self {
        let body: usize = entries.iter().map(|e| e.primitive.width()).sum();
        Self {
            kind,
            entries,
            expose_time,
            width: body + TIME_BLOCK_WIDTH + Primitive::Bool.width(),
        }
    }

    /// Layout for a frame kind.
    pub fn for_kind(kind: MessageKind) -> &'static Layout {
        static LAYOUTS: OnceLock<[Layout; 4]> = OnceLock::new();
        let layouts = LAYOUTS.get_or_init(|| {
            [
                Layout::new(MessageKind::Analog, analog_entries(), false),
                Layout::new(MessageKind::Digital, digital_entries(), false),
                Layout::new(MessageKind::Phase, phase_entries(), true),
                Layout::new(MessageKind::PowerQuality, power_quality_entries(), false),
            ]
        });
        match kind {
            MessageKind::Analog => &layouts[0],
            MessageKind::Digital => &layouts[1],
            MessageKind::Phase => &layouts[2],
            MessageKind::PowerQuality => &layouts[3],
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Data entries, excluding the time block and flag.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Whether the decoded reading also carries the raw time block fields.
    pub fn exposes_time(&self) -> bool {
        self.expose_time
    }

    /// Exact payload length in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Names of every field a decoded frame of this kind carries, in order.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        if self.expose_time {
            names.extend(TIME_FIELDS);
        }
        names.push(FLAG_FIELD);
        names
    }
}

const PHASES: [&str; 3] = ["R", "Y", "B"];

fn analog_entries() -> Vec<Entry> {
    (1..=4)
        .map(|ch| Entry::new(format!("ANASEN_CH{}", ch), Primitive::F32))
        .collect()
}

fn digital_entries() -> Vec<Entry> {
    (1..=8)
        .map(|ch| Entry::new(format!("Digi{}", ch), Primitive::U8))
        .collect()
}

#[rustfmt::skip]
const PHASE_NAMES: [&str; 97] = [
    "Voltage_PN1", "Voltage_PN2", "Voltage_PN3",
    "Voltage_PP1", "Voltage_PP2", "Voltage_PP3",
    "Current1", "Current2", "Current3",
    "NeutralCurrent", "Frequency1", "Frequency2", "Frequency3",
    "PowerFactor1", "PowerFactor2", "PowerFactor3",
    "AveragePF", "ActivePower1", "ActivePower2", "ActivePower3",
    "ReactivePower1", "ReactivePower2", "ReactivePower3",
    "ApparentPower1", "ApparentPower2", "ApparentPower3",
    "TotalActivePower", "TotalReactivePower", "TotalApparentPower",
    "AngleVA_VB", "AngleVB_VC", "AngleVA_VC",
    "AngleVA_IA", "AngleVB_IB", "AngleVC_IC",
    "AngleIA_IB", "AngleIB_IC", "AngleIA_IC",
    "ActiveEnergy1", "ActiveEnergy2", "ActiveEnergy3",
    "ReactiveEnergy1", "ReactiveEnergy2", "ReactiveEnergy3",
    "ApparentEnergy1", "ApparentEnergy2", "ApparentEnergy3",
    "Accum_ActEnergy", "Accum_ReactEnergy", "Accum_ApprntEnergy",
    "Total_ActEnergy", "Total_ReactEnergy", "Total_ApprntEnergy",
    "ActImpEnergy_R", "ActExpEnergy_R", "ActImpEnergy_Y", "ActExpEnergy_Y",
    "ActImpEnergy_B", "ActExpEnergy_B",
    "ReactEnergy_R_Q1", "ReactEnergy_R_Q2", "ReactEnergy_R_Q3", "ReactEnergy_R_Q4",
    "ReactEnergy_Y_Q1", "ReactEnergy_Y_Q2", "ReactEnergy_Y_Q3", "ReactEnergy_Y_Q4",
    "ReactEnergy_B_Q1", "ReactEnergy_B_Q2", "ReactEnergy_B_Q3", "ReactEnergy_B_Q4",
    "ReactImpEnergy_R", "ReactExpEnergy_R", "ReactImpEnergy_Y", "ReactExpEnergy_Y",
    "ReactImpEnergy_B", "ReactExpEnergy_B",
    "AppExpEnergy_R", "AppExpEnergy_Y", "AppExpEnergy_B",
    "ActImpCumEnergy", "ActExpCumEnergy",
    "AppImpEnergy_R", "AppImpEnergy_Y", "AppImpEnergy_B",
    "AppImpcumEnergy", "AppExpcumEnergy",
    "ReactiveCumQ1", "ReactiveCumQ2", "ReactiveCumQ3", "ReactiveCumQ4",
    "VTHD1", "VTHD2", "VTHD3", "ITHD1", "ITHD2", "ITHD3",
];

/// Floats on the wire after the named ones.
const PHASE_RESERVED: usize = 6;

fn phase_entries() -> Vec<Entry> {
    let named = PHASE_NAMES
        .iter()
        .map(|name| Entry::new(*name, Primitive::F32));
    let reserved = (1..=PHASE_RESERVED).map(|i| Entry::new(format!("Reserved{}", i), Primitive::F32));
    named.chain(reserved).collect()
}

fn per_phase(prefix: &str) -> impl Iterator<Item = String> + '_ {
    PHASES.iter().map(move |p| format!("{}_{}", prefix, p))
}

/// Pair a run of names with a repeating wire type pattern.
fn patterned(names: Vec<String>, pattern: &[Primitive]) -> impl Iterator<Item = Entry> + '_ {
    names
        .into_iter()
        .zip(pattern.iter().cycle())
        .map(|(name, p)| Entry::new(name, *p))
}

fn power_quality_entries() -> Vec<Entry> {
    use Primitive::{F32, U16, U32};

    let mut entries = Vec::with_capacity(131);

    for quantity in ["Vtg", "Cur", "Freq"] {
        for stat in ["Min", "Max", "Avg"] {
            entries.extend(per_phase(&format!("{}{}", stat, quantity)).map(|n| Entry::new(n, F32)));
        }
    }

    // Dip, swell and interruption blocks: three counters then a level, per phase.
    for event in ["Dip", "Swell", "Intrp"] {
        let names: Vec<String> = ["InstCount", "ResVoltage", "MomntCount", "TempCount"]
            .iter()
            .flat_map(|m| per_phase(&format!("{}_{}", event, m)).collect::<Vec<_>>())
            .collect();
        entries.extend(patterned(names, &[U16, U16, U16, F32]));
    }

    let rvc: Vec<String> = ["Count", "DeltaUss", "DeltaUmax"]
        .iter()
        .flat_map(|m| per_phase(&format!("Rvc_{}", m)).collect::<Vec<_>>())
        .collect();
    entries.extend(patterned(rvc, &[U16, F32, F32]));

    for block in ["CrestFactor", "OverCurrent", "UnderVoltage", "OverVoltage"] {
        entries.extend(per_phase(block).map(|n| Entry::new(n, F32)));
    }

    for (sym, unb) in [("SymCompVtg", "UnbCompVtg"), ("SymCompCur", "UnbCompCur")] {
        for m in [
            "NegSeqAng", "PosSeqAng", "PosSeqMag", "NegSeqMag", "ZeroSeqAng", "ZeroSeqMag",
        ] {
            entries.push(Entry::new(format!("{}_{}", sym, m), F32));
        }
        for m in ["NegUnbPct", "ZeroUnbPct"] {
            entries.push(Entry::new(format!("{}_{}", unb, m), F32));
        }
    }

    for block in ["VtgTHD", "CurTHD"] {
        entries.extend(per_phase(block).map(|n| Entry::new(n, F32)));
    }

    for phase in PHASES {
        entries.push(Entry::new(format!("Uod_{}_OverDeviation", phase), F32));
        entries.push(Entry::new(format!("Uod_{}_UnderDeviation", phase), F32));
    }

    for span in ["FlickInst", "FlickShort", "FlickLong"] {
        entries.push(Entry::new(format!("Flicker_{}_Event", span), U16));
        entries.extend(per_phase(&format!("Flicker_{}_Level", span)).map(|n| Entry::new(n, F32)));
    }

    entries.extend((1..=6).map(|i| Entry::new(format!("MsvValue{}", i), F32)));
    entries.push(Entry::new("EventRegister", U32));

    entries
}
