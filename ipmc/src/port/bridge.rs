//! USB-to-UART bridge classification.
//!
//! Only used to label ports in listings. Discovery never skips a port because
//! of its bridge: the handshake is the only proof of an IPMC board.

/// Known USB VID/PID pairs for bridges found on IPMC driver boards.
const KNOWN_USB_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (0x2341, &[], BridgeKind::Arduino),
    (0x2A03, &[], BridgeKind::Arduino),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3], BridgeKind::Prolific),
];

/// USB bridge family behind a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BridgeKind {
    /// Arduino native USB (ATmega16U2 / 32U4).
    Arduino,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232 family.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Not a USB port, or an unrecognized bridge.
    #[default]
    Unknown,
}

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the bridge was recognized.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}
