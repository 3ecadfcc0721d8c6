// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

pub(super) type Result<T, E = Error> = std::result::Result<T, E>;

/// Protocol-level errors. Decode and authentication failures are expected
/// steady-state events on a public socket; callers count them and drop the
/// datagram rather than propagating.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Error {
    #[error("datagram shorter than the message header")]
    TruncatedHeader,

    #[error("unknown message type {0}")]
    UnknownMsgType(u8),

    #[error("message body length does not match its type and count")]
    LengthMismatch,

    #[error("entry count {0} exceeds the per-message cap")]
    CountOverflow(u8),

    #[error("packet authentication failed")]
    AuthFailed,

    #[error("network key must be exactly 32 bytes")]
    BadKeyLength,

    #[error("topic must be a 64 character hex string")]
    BadTopicHex,
}
