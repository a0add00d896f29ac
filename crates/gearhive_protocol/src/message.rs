//! Packet kinds, role validity and message encoding.

use crate::error::ProtocolError;
use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

/// Header size in bytes: magic + kind + body size.
pub const HEADER_SIZE: usize = 12;

/// Maximum encoded size of a single argument, in bytes.
pub const MAX_ARG_SIZE: usize = 63;

const SEPARATOR: u8 = 0;

const MAGIC_REQ: &[u8; 4] = b"\0REQ";
const MAGIC_RES: &[u8; 4] = b"\0RES";

/// Direction marker of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// Client/worker -> broker.
    Req,
    /// Broker -> client/worker.
    Res,
}

impl Magic {
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Magic::Req => MAGIC_REQ,
            Magic::Res => MAGIC_RES,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"\0REQ" => Some(Magic::Req),
            b"\0RES" => Some(Magic::Res),
            _ => None,
        }
    }
}

/// The role a peer is acting in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Client,
    Server,
}

/// Set of non-server roles a packet kind is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const WORKER: RoleSet = RoleSet(0b01);
    pub const CLIENT: RoleSet = RoleSet(0b10);
    pub const WORKER_AND_CLIENT: RoleSet = RoleSet(0b11);

    pub fn contains(self, role: Role) -> bool {
        match role {
            Role::Worker => self.0 & RoleSet::WORKER.0 != 0,
            Role::Client => self.0 & RoleSet::CLIENT.0 != 0,
            Role::Server => false,
        }
    }
}

/// Packet kind, 1..=42 on the wire. Value 5 is unassigned in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketKind {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
    SubmitReduceJob = 37,
    SubmitReduceJobBg = 38,
    GrabJobAll = 39,
    JobAssignAll = 40,
    GetStatusUnique = 41,
    StatusResUnique = 42,
}

impl PacketKind {
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        use PacketKind::*;
        match value {
            1 => Ok(CanDo),
            2 => Ok(CantDo),
            3 => Ok(ResetAbilities),
            4 => Ok(PreSleep),
            6 => Ok(Noop),
            7 => Ok(SubmitJob),
            8 => Ok(JobCreated),
            9 => Ok(GrabJob),
            10 => Ok(NoJob),
            11 => Ok(JobAssign),
            12 => Ok(WorkStatus),
            13 => Ok(WorkComplete),
            14 => Ok(WorkFail),
            15 => Ok(GetStatus),
            16 => Ok(EchoReq),
            17 => Ok(EchoRes),
            18 => Ok(SubmitJobBg),
            19 => Ok(Error),
            20 => Ok(StatusRes),
            21 => Ok(SubmitJobHigh),
            22 => Ok(SetClientId),
            23 => Ok(CanDoTimeout),
            24 => Ok(AllYours),
            25 => Ok(WorkException),
            26 => Ok(OptionReq),
            27 => Ok(OptionRes),
            28 => Ok(WorkData),
            29 => Ok(WorkWarning),
            30 => Ok(GrabJobUniq),
            31 => Ok(JobAssignUniq),
            32 => Ok(SubmitJobHighBg),
            33 => Ok(SubmitJobLow),
            34 => Ok(SubmitJobLowBg),
            35 => Ok(SubmitJobSched),
            36 => Ok(SubmitJobEpoch),
            37 => Ok(SubmitReduceJob),
            38 => Ok(SubmitReduceJobBg),
            39 => Ok(GrabJobAll),
            40 => Ok(JobAssignAll),
            41 => Ok(GetStatusUnique),
            42 => Ok(StatusResUnique),
            _ => Err(ProtocolError::InvalidKind(value)),
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        use PacketKind::*;
        match self {
            CanDo => "CAN_DO",
            CantDo => "CANT_DO",
            ResetAbilities => "RESET_ABILITIES",
            PreSleep => "PRE_SLEEP",
            Noop => "NOOP",
            SubmitJob => "SUBMIT_JOB",
            JobCreated => "JOB_CREATED",
            GrabJob => "GRAB_JOB",
            NoJob => "NO_JOB",
            JobAssign => "JOB_ASSIGN",
            WorkStatus => "WORK_STATUS",
            WorkComplete => "WORK_COMPLETE",
            WorkFail => "WORK_FAIL",
            GetStatus => "GET_STATUS",
            EchoReq => "ECHO_REQ",
            EchoRes => "ECHO_RES",
            SubmitJobBg => "SUBMIT_JOB_BG",
            Error => "ERROR",
            StatusRes => "STATUS_RES",
            SubmitJobHigh => "SUBMIT_JOB_HIGH",
            SetClientId => "SET_CLIENT_ID",
            CanDoTimeout => "CAN_DO_TIMEOUT",
            AllYours => "ALL_YOURS",
            WorkException => "WORK_EXCEPTION",
            OptionReq => "OPTION_REQ",
            OptionRes => "OPTION_RES",
            WorkData => "WORK_DATA",
            WorkWarning => "WORK_WARNING",
            GrabJobUniq => "GRAB_JOB_UNIQ",
            JobAssignUniq => "JOB_ASSIGN_UNIQ",
            SubmitJobHighBg => "SUBMIT_JOB_HIGH_BG",
            SubmitJobLow => "SUBMIT_JOB_LOW",
            SubmitJobLowBg => "SUBMIT_JOB_LOW_BG",
            SubmitJobSched => "SUBMIT_JOB_SCHED",
            SubmitJobEpoch => "SUBMIT_JOB_EPOCH",
            SubmitReduceJob => "SUBMIT_REDUCE_JOB",
            SubmitReduceJobBg => "SUBMIT_REDUCE_JOB_BACKGROUND",
            GrabJobAll => "GRAB_JOB_ALL",
            JobAssignAll => "JOB_ASSIGN_ALL",
            GetStatusUnique => "GET_STATUS_UNIQUE",
            StatusResUnique => "STATUS_RES_UNIQUE",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed argument count for a packet kind, if it has one. Kinds without an
/// entry are not arity-checked.
pub fn arity(kind: PacketKind) -> Option<usize> {
    use PacketKind::*;
    match kind {
        SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow
        | SubmitJobLowBg => Some(3),
        SubmitReduceJob | SubmitReduceJobBg => Some(4),
        SubmitJobSched => Some(8),
        SubmitJobEpoch => Some(4),
        GetStatus | GetStatusUnique => Some(1),
        OptionReq | OptionRes => Some(1),
        JobCreated => Some(1),
        WorkData | WorkWarning => Some(2),
        WorkStatus => Some(3),
        WorkComplete => Some(2),
        WorkFail => Some(1),
        WorkException => Some(2),
        StatusRes => Some(5),
        StatusResUnique => Some(6),
        CanDo | CantDo => Some(1),
        CanDoTimeout => Some(2),
        ResetAbilities | PreSleep | GrabJob | GrabJobUniq | GrabJobAll | AllYours => Some(0),
        SetClientId => Some(1),
        _ => None,
    }
}

/// Which non-server roles may receive/send a packet of this `(magic, kind)`
/// combination. `None` means the combination never appears on the wire.
pub fn allowed_roles(magic: Magic, kind: PacketKind) -> Option<RoleSet> {
    use PacketKind::*;
    match (magic, kind) {
        (Magic::Req, CanDo)
        | (Magic::Req, CantDo)
        | (Magic::Req, ResetAbilities)
        | (Magic::Req, PreSleep)
        | (Magic::Req, GrabJob)
        | (Magic::Req, GrabJobUniq)
        | (Magic::Req, GrabJobAll)
        | (Magic::Req, WorkStatus)
        | (Magic::Req, WorkComplete)
        | (Magic::Req, WorkFail)
        | (Magic::Req, WorkException)
        | (Magic::Req, WorkData)
        | (Magic::Req, WorkWarning)
        | (Magic::Req, SetClientId)
        | (Magic::Req, CanDoTimeout)
        | (Magic::Req, AllYours) => Some(RoleSet::WORKER),

        (Magic::Req, SubmitJob)
        | (Magic::Req, SubmitJobBg)
        | (Magic::Req, SubmitJobHigh)
        | (Magic::Req, SubmitJobHighBg)
        | (Magic::Req, SubmitJobLow)
        | (Magic::Req, SubmitJobLowBg)
        | (Magic::Req, SubmitJobSched)
        | (Magic::Req, SubmitJobEpoch)
        | (Magic::Req, SubmitReduceJob)
        | (Magic::Req, SubmitReduceJobBg)
        | (Magic::Req, GetStatus)
        | (Magic::Req, GetStatusUnique) => Some(RoleSet::CLIENT),

        (Magic::Req, EchoReq) | (Magic::Req, OptionReq) => Some(RoleSet::WORKER_AND_CLIENT),

        (Magic::Res, Noop)
        | (Magic::Res, NoJob)
        | (Magic::Res, JobAssign)
        | (Magic::Res, JobAssignUniq)
        | (Magic::Res, JobAssignAll) => Some(RoleSet::WORKER),

        (Magic::Res, JobCreated)
        | (Magic::Res, WorkStatus)
        | (Magic::Res, WorkComplete)
        | (Magic::Res, WorkFail)
        | (Magic::Res, WorkException)
        | (Magic::Res, WorkData)
        | (Magic::Res, WorkWarning)
        | (Magic::Res, StatusRes)
        | (Magic::Res, StatusResUnique) => Some(RoleSet::CLIENT),

        (Magic::Res, EchoRes) | (Magic::Res, Error) | (Magic::Res, OptionRes) => {
            Some(RoleSet::WORKER_AND_CLIENT)
        }

        _ => None,
    }
}

/// A REQ/RES packet: direction marker, kind and NUL-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub magic: Magic,
    pub kind: PacketKind,
    pub arguments: Vec<String>,
}

impl Message {
    pub fn request(kind: PacketKind, arguments: Vec<String>) -> Self {
        Self {
            magic: Magic::Req,
            kind,
            arguments,
        }
    }

    pub fn response(kind: PacketKind, arguments: Vec<String>) -> Self {
        Self {
            magic: Magic::Res,
            kind,
            arguments,
        }
    }

    /// Check the message against the receiving `role`:
    /// REQ must arrive at the server, RES at a client/worker; the kind must
    /// be known for the role; the argument count must match the arity table.
    pub fn validate(&self, role: Role) -> Result<(), ProtocolError> {
        let wrong_direction = match role {
            Role::Server => self.magic == Magic::Res,
            _ => self.magic == Magic::Req,
        };
        if wrong_direction {
            return Err(ProtocolError::InvalidRole { kind: self.kind });
        }
        let allowed = allowed_roles(self.magic, self.kind)
            .ok_or(ProtocolError::InvalidRole { kind: self.kind })?;
        if role != Role::Server && !allowed.contains(role) {
            return Err(ProtocolError::InvalidRole { kind: self.kind });
        }
        if let Some(expected) = arity(self.kind) {
            if self.arguments.len() != expected {
                return Err(ProtocolError::InvalidArity {
                    kind: self.kind,
                    expected,
                    got: self.arguments.len(),
                });
            }
        }
        Ok(())
    }

    /// Encode to the wire format. Every argument is capped at
    /// [`MAX_ARG_SIZE`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body_len = 0;
        for arg in &self.arguments {
            if arg.len() > MAX_ARG_SIZE {
                return Err(ProtocolError::ArgumentTooLong { len: arg.len() });
            }
            body_len += arg.len();
        }
        body_len += self.arguments.len().saturating_sub(1);

        let mut buf = Vec::with_capacity(HEADER_SIZE + body_len);
        buf.write_all(self.magic.as_bytes())?;
        buf.write_u32::<BigEndian>(self.kind.as_u32())?;
        buf.write_u32::<BigEndian>(body_len as u32)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                buf.push(SEPARATOR);
            }
            buf.write_all(arg.as_bytes())?;
        }
        Ok(buf)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.magic {
            Magic::Req => "REQ",
            Magic::Res => "RES",
        };
        write!(f, "{direction}.{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_string(n: usize) -> String {
        "a".repeat(n)
    }

    #[test]
    fn encode_normal() {
        let msg = Message::request(
            PacketKind::SubmitJob,
            vec!["echo".into(), "111".into(), "hello world".into()],
        );
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[..4], MAGIC_REQ);
        assert_eq!(bytes.len(), HEADER_SIZE + "echo\0111\0hello world".len());
    }

    #[test]
    fn encode_rejects_long_argument() {
        let msg = Message::request(
            PacketKind::SubmitJob,
            vec!["echo".into(), "1234".into(), long_string(MAX_ARG_SIZE + 1)],
        );
        assert!(matches!(
            msg.encode(),
            Err(ProtocolError::ArgumentTooLong { len: 64 })
        ));
    }

    #[test]
    fn encode_accepts_argument_at_limit() {
        let msg = Message::request(
            PacketKind::SubmitJob,
            vec!["echo".into(), "1234".into(), long_string(MAX_ARG_SIZE)],
        );
        assert!(msg.encode().is_ok());
    }

    #[test]
    fn validate_request_roles() {
        let msg = Message::request(
            PacketKind::SubmitJob,
            vec!["echo".into(), "111".into(), "hello world".into()],
        );
        assert!(msg.validate(Role::Server).is_ok());
        assert!(matches!(
            msg.validate(Role::Worker),
            Err(ProtocolError::InvalidRole { .. })
        ));
    }

    #[test]
    fn validate_response_roles() {
        let msg = Message::response(
            PacketKind::JobAssign,
            vec!["1111".into(), "echo".into(), "hello world".into()],
        );
        assert!(msg.validate(Role::Worker).is_ok());
        assert!(matches!(
            msg.validate(Role::Client),
            Err(ProtocolError::InvalidRole { .. })
        ));
        assert!(matches!(
            msg.validate(Role::Server),
            Err(ProtocolError::InvalidRole { .. })
        ));
    }

    #[test]
    fn validate_dual_role_kinds() {
        let msg = Message::response(PacketKind::EchoRes, vec!["hello world".into()]);
        assert!(msg.validate(Role::Client).is_ok());
        assert!(msg.validate(Role::Worker).is_ok());
        assert!(msg.validate(Role::Server).is_err());
    }

    #[test]
    fn validate_arity() {
        let msg = Message::request(PacketKind::SubmitJob, vec![]);
        assert!(matches!(
            msg.validate(Role::Server),
            Err(ProtocolError::InvalidArity {
                expected: 3,
                got: 0,
                ..
            })
        ));
    }

    #[test]
    fn kind_numeric_roundtrip() {
        for value in 1u32..=42 {
            if value == 5 {
                assert!(PacketKind::from_u32(value).is_err());
                continue;
            }
            let kind = PacketKind::from_u32(value).unwrap();
            assert_eq!(kind.as_u32(), value);
        }
        assert!(PacketKind::from_u32(0).is_err());
        assert!(PacketKind::from_u32(43).is_err());
    }

    #[test]
    fn arity_table_spot_checks() {
        assert_eq!(arity(PacketKind::SubmitReduceJob), Some(4));
        assert_eq!(arity(PacketKind::StatusResUnique), Some(6));
        assert_eq!(arity(PacketKind::GrabJob), Some(0));
        assert_eq!(arity(PacketKind::JobAssign), None);
    }
}
