use bytes::Bytes;
use dsr_common::Address;

/// A single entry of a recorded route: the address that was appended and the weight of the link
/// that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub address: Address,
    pub weight: u16,
}

impl Hop {
    #[inline]
    pub const fn new(address: Address, weight: u16) -> Self {
        Self { address, weight }
    }
}

/// The option types carried in a DSR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionType {
    RouteRequest = 1,
    RouteReply = 2,
    RouteError = 3,
    AckRequest = 4,
    Ack = 5,
    SourceRoute = 6,
}

impl TryFrom<u8> for OptionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::RouteRequest,
            2 => Self::RouteReply,
            3 => Self::RouteError,
            4 => Self::AckRequest,
            5 => Self::Ack,
            6 => Self::SourceRoute,
            other => return Err(other),
        })
    }
}

/// A DSR option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsrOption {
    /// Route discovery flood. `route` starts at the initiator and grows by one or two hops per
    /// relaying node.
    RouteRequest { identification: u16, target: Address, ttl: u8, route: Vec<Hop> },
    /// A discovered route, from the initiator to the target.
    RouteReply { route: Vec<Hop> },
    /// The link `error_source -> unreachable` is broken.
    RouteError { error_source: Address, error_destination: Address, unreachable: Address },
    /// Asks the next hop to acknowledge reception.
    AckRequest { identification: u16 },
    /// Acknowledges the frame `identification` on the link `source -> destination`.
    Ack { identification: u16, source: Address, destination: Address },
    /// The complete route from originator to destination. `segments_left` counts the hops still
    /// to be traversed after the node the frame is currently addressed to.
    SourceRoute { segments_left: u8, hops: Vec<Address> },
}

impl DsrOption {
    pub const fn option_type(&self) -> OptionType {
        match self {
            Self::RouteRequest { .. } => OptionType::RouteRequest,
            Self::RouteReply { .. } => OptionType::RouteReply,
            Self::RouteError { .. } => OptionType::RouteError,
            Self::AckRequest { .. } => OptionType::AckRequest,
            Self::Ack { .. } => OptionType::Ack,
            Self::SourceRoute { .. } => OptionType::SourceRoute,
        }
    }
}

/// A DSR frame: link-layer header, network-layer endpoints, options and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link-layer sender.
    pub l2_src: Address,
    /// Link-layer receiver, or [`Address::BROADCAST`].
    pub l2_dst: Address,
    /// The originating node.
    pub source: Address,
    /// The final destination, or [`Address::BROADCAST`].
    pub destination: Address,
    pub options: Vec<DsrOption>,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame without options. The link-layer header is filled in on transmission.
    pub fn new(source: Address, destination: Address, payload: Bytes) -> Self {
        Self {
            l2_src: Address::UNSPECIFIED,
            l2_dst: Address::UNSPECIFIED,
            source,
            destination,
            options: Vec::new(),
            payload,
        }
    }

    /// Appends an option and returns the frame.
    pub fn with_option(mut self, option: DsrOption) -> Self {
        self.options.push(option);
        self
    }

    #[inline]
    pub fn push_option(&mut self, option: DsrOption) {
        self.options.push(option);
    }

    pub fn has_option(&self, ty: OptionType) -> bool {
        self.options.iter().any(|o| o.option_type() == ty)
    }

    /// Removes every option of the given type and returns how many were removed.
    pub fn remove_options(&mut self, ty: OptionType) -> usize {
        let before = self.options.len();
        self.options.retain(|o| o.option_type() != ty);
        before - self.options.len()
    }

    /// Returns the source route option as `(segments_left, hops)`.
    pub fn source_route(&self) -> Option<(u8, &[Address])> {
        self.options.iter().find_map(|o| match o {
            DsrOption::SourceRoute { segments_left, hops } => Some((*segments_left, hops.as_slice())),
            _ => None,
        })
    }

    /// Returns a mutable reference to the segments left counter of the source route option.
    pub fn segments_left_mut(&mut self) -> Option<&mut u8> {
        self.options.iter_mut().find_map(|o| match o {
            DsrOption::SourceRoute { segments_left, .. } => Some(segments_left),
            _ => None,
        })
    }

    /// Returns the identification of the acknowledgement request option, if any.
    pub fn ack_request(&self) -> Option<u16> {
        self.options.iter().find_map(|o| match o {
            DsrOption::AckRequest { identification } => Some(*identification),
            _ => None,
        })
    }

    /// Returns true if the frame carries at least one route reply.
    #[inline]
    pub fn has_route_reply(&self) -> bool {
        self.has_option(OptionType::RouteReply)
    }

    /// Returns true if the frame was sent to every neighbor.
    #[inline]
    pub fn is_l2_broadcast(&self) -> bool {
        self.l2_dst.is_broadcast()
    }
}
