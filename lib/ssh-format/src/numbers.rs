//! SSH message numbers (RFC 4250 §4.1) and their human-readable names, used
//! throughout `tracing` spans.

pub const SSH_MSG_DISCONNECT: u8 = 1;
pub const SSH_MSG_IGNORE: u8 = 2;
pub const SSH_MSG_UNIMPLEMENTED: u8 = 3;
pub const SSH_MSG_DEBUG: u8 = 4;
pub const SSH_MSG_SERVICE_REQUEST: u8 = 5;
pub const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
pub const SSH_MSG_EXT_INFO: u8 = 7;

pub const SSH_MSG_KEXINIT: u8 = 20;
pub const SSH_MSG_NEWKEYS: u8 = 21;

pub const SSH_MSG_KEXDH_INIT: u8 = 30;
pub const SSH_MSG_KEXDH_REPLY: u8 = 31;

pub const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
pub const SSH_MSG_USERAUTH_FAILURE: u8 = 51;
pub const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;
pub const SSH_MSG_USERAUTH_BANNER: u8 = 53;
pub const SSH_MSG_USERAUTH_PK_OK: u8 = 60;

pub const SSH_MSG_GLOBAL_REQUEST: u8 = 80;
pub const SSH_MSG_REQUEST_SUCCESS: u8 = 81;
pub const SSH_MSG_REQUEST_FAILURE: u8 = 82;
pub const SSH_MSG_CHANNEL_OPEN: u8 = 90;
pub const SSH_MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub const SSH_MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
pub const SSH_MSG_CHANNEL_WINDOW_ADJUST: u8 = 93;
pub const SSH_MSG_CHANNEL_DATA: u8 = 94;
pub const SSH_MSG_CHANNEL_EXTENDED_DATA: u8 = 95;
pub const SSH_MSG_CHANNEL_EOF: u8 = 96;
pub const SSH_MSG_CHANNEL_CLOSE: u8 = 97;
pub const SSH_MSG_CHANNEL_REQUEST: u8 = 98;
pub const SSH_MSG_CHANNEL_SUCCESS: u8 = 99;
pub const SSH_MSG_CHANNEL_FAILURE: u8 = 100;

/// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED` (RFC 4254 §5.1).
pub const SSH_OPEN_ADMINISTRATIVELY_PROHIBITED: u32 = 1;

pub fn packet_type_to_string(packet_type: u8) -> &'static str {
    match packet_type {
        SSH_MSG_DISCONNECT => "SSH_MSG_DISCONNECT",
        SSH_MSG_IGNORE => "SSH_MSG_IGNORE",
        SSH_MSG_UNIMPLEMENTED => "SSH_MSG_UNIMPLEMENTED",
        SSH_MSG_DEBUG => "SSH_MSG_DEBUG",
        SSH_MSG_SERVICE_REQUEST => "SSH_MSG_SERVICE_REQUEST",
        SSH_MSG_SERVICE_ACCEPT => "SSH_MSG_SERVICE_ACCEPT",
        SSH_MSG_EXT_INFO => "SSH_MSG_EXT_INFO",
        SSH_MSG_KEXINIT => "SSH_MSG_KEXINIT",
        SSH_MSG_NEWKEYS => "SSH_MSG_NEWKEYS",
        SSH_MSG_KEXDH_INIT => "SSH_MSG_KEXDH_INIT",
        SSH_MSG_KEXDH_REPLY => "SSH_MSG_KEXDH_REPLY",
        SSH_MSG_USERAUTH_REQUEST => "SSH_MSG_USERAUTH_REQUEST",
        SSH_MSG_USERAUTH_FAILURE => "SSH_MSG_USERAUTH_FAILURE",
        SSH_MSG_USERAUTH_SUCCESS => "SSH_MSG_USERAUTH_SUCCESS",
        SSH_MSG_USERAUTH_BANNER => "SSH_MSG_USERAUTH_BANNER",
        SSH_MSG_USERAUTH_PK_OK => "SSH_MSG_USERAUTH_PK_OK",
        SSH_MSG_GLOBAL_REQUEST => "SSH_MSG_GLOBAL_REQUEST",
        SSH_MSG_REQUEST_SUCCESS => "SSH_MSG_REQUEST_SUCCESS",
        SSH_MSG_REQUEST_FAILURE => "SSH_MSG_REQUEST_FAILURE",
        SSH_MSG_CHANNEL_OPEN => "SSH_MSG_CHANNEL_OPEN",
        SSH_MSG_CHANNEL_OPEN_CONFIRMATION => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
        SSH_MSG_CHANNEL_OPEN_FAILURE => "SSH_MSG_CHANNEL_OPEN_FAILURE",
        SSH_MSG_CHANNEL_WINDOW_ADJUST => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
        SSH_MSG_CHANNEL_DATA => "SSH_MSG_CHANNEL_DATA",
        SSH_MSG_CHANNEL_EXTENDED_DATA => "SSH_MSG_CHANNEL_EXTENDED_DATA",
        SSH_MSG_CHANNEL_EOF => "SSH_MSG_CHANNEL_EOF",
        SSH_MSG_CHANNEL_CLOSE => "SSH_MSG_CHANNEL_CLOSE",
        SSH_MSG_CHANNEL_REQUEST => "SSH_MSG_CHANNEL_REQUEST",
        SSH_MSG_CHANNEL_SUCCESS => "SSH_MSG_CHANNEL_SUCCESS",
        SSH_MSG_CHANNEL_FAILURE => "SSH_MSG_CHANNEL_FAILURE",
        _ => "UNKNOWN",
    }
}

/// RFC 4253 §11.1 disconnect reason codes.
pub fn disconnect_reason_to_string(reason: u32) -> &'static str {
    match reason {
        1 => "HOST_NOT_ALLOWED_TO_CONNECT",
        2 => "PROTOCOL_ERROR",
        3 => "KEY_EXCHANGE_FAILED",
        4 => "RESERVED",
        5 => "MAC_ERROR",
        6 => "COMPRESSION_ERROR",
        7 => "SERVICE_NOT_AVAILABLE",
        8 => "PROTOCOL_VERSION_NOT_SUPPORTED",
        9 => "HOST_KEY_NOT_VERIFIABLE",
        10 => "CONNECTION_LOST",
        11 => "BY_APPLICATION",
        12 => "TOO_MANY_CONNECTIONS",
        13 => "AUTH_CANCELLED_BY_USER",
        14 => "NO_MORE_AUTH_METHODS_AVAILABLE",
        15 => "ILLEGAL_USER_NAME",
        _ => "UNKNOWN",
    }
}
