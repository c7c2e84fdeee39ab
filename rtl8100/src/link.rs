// Link state, PHY status decoding and medium selection

use core::fmt;
use serde::{Deserialize, Serialize};

// PHYstatus bits
pub const PHY_TX_FLOW_CTRL: u8 = 0x40;
pub const PHY_RX_FLOW_CTRL: u8 = 0x20;
pub const PHY_1000BPS_F: u8 = 0x10;
pub const PHY_100BPS: u8 = 0x08;
pub const PHY_10BPS: u8 = 0x04;
pub const PHY_LINK_STATUS: u8 = 0x02;
pub const PHY_FULL_DUP: u8 = 0x01;

/// Raw contents of the PHYstatus register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyStatus(pub u8);

impl PhyStatus {
    pub fn link_up(&self) -> bool {
        self.0 & PHY_LINK_STATUS != 0
    }

    /// Speed, duplex and flow control negotiated by the PHY.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            speed: if self.0 & PHY_100BPS != 0 {
                LinkSpeed::Mbps100
            } else {
                LinkSpeed::Mbps10
            },
            duplex: if self.0 & PHY_FULL_DUP != 0 {
                Duplex::Full
            } else {
                Duplex::Half
            },
            flow_control: self.0 & (PHY_TX_FLOW_CTRL | PHY_RX_FLOW_CTRL) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Mbps10,
    Mbps100,
}

impl LinkSpeed {
    pub fn mbps(&self) -> u32 {
        match self {
            LinkSpeed::Mbps10 => 10,
            LinkSpeed::Mbps100 => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Parameters of an established link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub speed: LinkSpeed,
    pub duplex: Duplex,
    pub flow_control: bool,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Mbit/s, {} duplex, flow control {}",
            self.speed.mbps(),
            match self.duplex {
                Duplex::Full => "full",
                Duplex::Half => "half",
            },
            if self.flow_control { "on" } else { "off" }
        )
    }
}

/// Link state as published upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up(LinkStatus),
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up(_))
    }
}

/// Medium requested by the administrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Medium {
    #[default]
    Auto,
    Half10,
    Full10,
    Half100,
    Full100,
}

impl Medium {
    /// Forced speed and duplex, or `None` for autonegotiation.
    pub fn forced(&self) -> Option<(LinkSpeed, Duplex)> {
        match self {
            Medium::Auto => None,
            Medium::Half10 => Some((LinkSpeed::Mbps10, Duplex::Half)),
            Medium::Full10 => Some((LinkSpeed::Mbps10, Duplex::Full)),
            Medium::Half100 => Some((LinkSpeed::Mbps100, Duplex::Half)),
            Medium::Full100 => Some((LinkSpeed::Mbps100, Duplex::Full)),
        }
    }
}
