//! The Message Dispatcher (§4.5): once a session reaches `Authenticating`,
//! inbound packets are parsed into typed [`Message`]s, queued in arrival
//! order, and handed to the embedder's callback. A callback that declines
//! a message gets the protocol's default reply applied on its behalf.
//!
//! Full RFC 4254 channel data-plane semantics -- window/flow control,
//! data transfer, port/X11/agent forwarding -- are out of scope (see the
//! Non-goals in the design this crate implements); this crate only
//! dispatches and default-replies to auth, service, channel-open and
//! channel-request packets, the shape the embedder needs to decide
//! whether to let a client in at all.

use std::collections::VecDeque;

use ssh_format::{numbers, NameList, Reader, Writer};
use ssh_transport::packet::Packet;
use ssh_transport::server::ServerConnection;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("packet encoding error: {0}")]
    Format(#[from] ssh_format::FormatError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// RFC 4252 §7: a publickey or hostbased request's signature is either
/// absent (a "query": would this key be acceptable) or present (a signed
/// request to actually authenticate) -- this is the "signature_state" of
/// the data model.
pub type SignatureState = Option<Vec<u8>>;

/// The method-specific payload of a `SSH_MSG_USERAUTH_REQUEST` (RFC 4252
/// §5.2, §7, §8, §9; RFC 4256 §3.1).
#[derive(Debug, Clone)]
pub enum AuthMethod {
    None,
    Password {
        password: String,
        new_password: Option<String>,
    },
    PublicKey {
        algorithm: String,
        blob: Vec<u8>,
        signature: SignatureState,
    },
    HostBased {
        algorithm: String,
        host_key_blob: Vec<u8>,
        client_hostname: String,
        client_username: String,
        signature: Vec<u8>,
    },
    KeyboardInteractive {
        language: String,
        submethods: String,
    },
    /// A method name the dispatcher doesn't parse further. RFC 4252 §5.2
    /// leaves the method list open-ended; an unrecognized method is still
    /// forwarded to the embedder, just without method-specific fields.
    Other(String),
}

/// The request-specific payload of a `SSH_MSG_CHANNEL_REQUEST` (RFC 4254
/// §6.2, §6.5, §6.7, §6.9, §6.10).
#[derive(Debug, Clone)]
pub enum ChannelRequestKind {
    PtyReq {
        term: String,
        width: u32,
        height: u32,
        pxwidth: u32,
        pxheight: u32,
    },
    Shell,
    Exec {
        command: String,
    },
    Subsystem {
        subsystem: String,
    },
    Env {
        env_name: String,
        env_value: String,
    },
    WindowChange {
        width: u32,
        height: u32,
        pxwidth: u32,
        pxheight: u32,
    },
    Signal {
        name: String,
    },
    ExitStatus {
        status: u32,
    },
    Other(String),
}

/// A parsed, post-authentication-phase request, owned by the dispatcher
/// until the embedder's callback (or a default reply) disposes of it
/// (§3: "Message ... destroyed after the embedder ... handles it").
#[derive(Debug, Clone)]
pub enum Message {
    AuthRequest {
        username: String,
        service: String,
        method: AuthMethod,
    },
    ServiceRequest {
        service: String,
    },
    ChannelOpen {
        channel_type: String,
        sender: u32,
        initial_window: u32,
        max_packet: u32,
        origin: Option<String>,
        destination: Option<String>,
        origin_port: Option<u32>,
        destination_port: Option<u32>,
    },
    ChannelRequest {
        channel: u32,
        request_type: String,
        want_reply: bool,
        kind: ChannelRequestKind,
    },
}

/// Tri-state callback contract of §4.5: a message is either fully handled
/// by the embedder, or declined, in which case [`MessageDispatcher`]
/// applies the protocol's default reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Handled,
    Declined,
}

/// The embedder's message callback. Implementations get mutable access to
/// both the dispatcher (to call the `auth_reply_*`/`auth_set_methods`
/// helpers) and the connection (to queue any reply packets) inline with
/// handling a message, mirroring the progress-hook callback shape used by
/// `ssh_transport::server::ProgressHook`.
pub trait MessageCallback: Send {
    fn on_message(
        &mut self,
        dispatcher: &mut MessageDispatcher,
        connection: &mut ServerConnection,
        message: &Message,
    ) -> CallbackResult;
}

impl<F> MessageCallback for F
where
    F: FnMut(&mut MessageDispatcher, &mut ServerConnection, &Message) -> CallbackResult + Send,
{
    fn on_message(
        &mut self,
        dispatcher: &mut MessageDispatcher,
        connection: &mut ServerConnection,
        message: &Message,
    ) -> CallbackResult {
        self(dispatcher, connection, message)
    }
}

/// RFC 4252 §5.1's method list, as a bitset rather than a `Vec<String>` so
/// `auth_set_methods` is a cheap mutation of the session's advertised
/// methods mask (§4.5, §9: "global supported-methods table ... replace
/// with an immutable per-build constant table" -- here, per-session
/// mutable state instead, since `auth_set_methods` is an embedder-facing
/// operation on a live session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMethods {
    pub publickey: bool,
    pub keyboard_interactive: bool,
    pub password: bool,
    pub hostbased: bool,
}

impl AuthMethods {
    pub const NONE: AuthMethods = AuthMethods {
        publickey: false,
        keyboard_interactive: false,
        password: false,
        hostbased: false,
    };

    /// The source's default when `auth_methods` is unset: publickey and
    /// password (see DESIGN.md).
    pub const DEFAULT: AuthMethods = AuthMethods {
        publickey: true,
        keyboard_interactive: false,
        password: true,
        hostbased: false,
    };

    /// Renders the bitset as the comma-joined name-list the source builds
    /// with repeated `strcat`, in the same method order.
    fn name_list(&self) -> String {
        let mut names = Vec::new();
        if self.publickey {
            names.push("publickey");
        }
        if self.keyboard_interactive {
            names.push("keyboard-interactive");
        }
        if self.password {
            names.push("password");
        }
        if self.hostbased {
            names.push("hostbased");
        }
        names.join(",")
    }
}

impl Default for AuthMethods {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Converts post-`Authenticating` packets into [`Message`]s and applies
/// default replies when the embedder declines them.
pub struct MessageDispatcher {
    queue: VecDeque<Message>,
    auth_methods: AuthMethods,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            auth_methods: AuthMethods::default(),
        }
    }

    /// Pulls every packet the transport has queued for us, parses it into
    /// a [`Message`], and enqueues it. Packet kinds this dispatcher does
    /// not recognize (full channel data/window traffic, global requests,
    /// ...) are logged and dropped rather than erroring the session --
    /// they are out of scope for this crate, not protocol violations.
    pub fn recv_from(&mut self, connection: &mut ServerConnection) -> Result<()> {
        while let Some(packet) = connection.next_plaintext_packet() {
            if let Some(message) = parse_message(&packet)? {
                self.queue.push_back(message);
            }
        }
        Ok(())
    }

    /// Drains the queue, invoking `callback` for each message and applying
    /// the default reply whenever it declines (§4.5).
    pub fn execute_callbacks(
        &mut self,
        connection: &mut ServerConnection,
        callback: &mut impl MessageCallback,
    ) {
        while let Some(message) = self.queue.pop_front() {
            match callback.on_message(self, connection, &message) {
                CallbackResult::Handled => {}
                CallbackResult::Declined => self.reply_default(connection, &message),
            }
        }
    }

    fn reply_default(&mut self, connection: &mut ServerConnection, message: &Message) {
        match message {
            Message::AuthRequest { .. } => self.send_auth_failure(connection, false),
            Message::ServiceRequest { service } => self.send_service_accept(connection, service),
            Message::ChannelOpen { sender, .. } => {
                self.send_channel_open_failure(connection, *sender)
            }
            Message::ChannelRequest {
                channel,
                want_reply,
                ..
            } => {
                if *want_reply {
                    self.send_channel_failure(connection, *channel);
                }
            }
        }
    }

    /// `auth_reply_success(partial)`: success, unless `partial`, in which
    /// case this behaves as a failure reply with `partial=true`.
    pub fn auth_reply_success(&mut self, connection: &mut ServerConnection, partial: bool) {
        if partial {
            self.send_auth_failure(connection, true);
            return;
        }
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_USERAUTH_SUCCESS);
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }

    /// `auth_reply_pk_ok(algo, pubkey)`.
    pub fn auth_reply_pk_ok(&mut self, connection: &mut ServerConnection, algorithm: &str, pubkey_blob: &[u8]) {
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_USERAUTH_PK_OK);
        w.string(algorithm.as_bytes());
        w.string(pubkey_blob);
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }

    /// `auth_set_methods(methods_bitset)`: mutates the methods advertised
    /// in subsequent default `USERAUTH_FAILURE` replies.
    pub fn auth_set_methods(&mut self, methods: AuthMethods) {
        self.auth_methods = methods;
    }

    fn send_auth_failure(&mut self, connection: &mut ServerConnection, partial: bool) {
        let methods = self.auth_methods.name_list();
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_USERAUTH_FAILURE);
        w.name_list(NameList::multi(&methods));
        w.bool(partial);
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }

    fn send_service_accept(&mut self, connection: &mut ServerConnection, service: &str) {
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_SERVICE_ACCEPT);
        w.string(service.as_bytes());
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }

    fn send_channel_open_failure(&mut self, connection: &mut ServerConnection, sender: u32) {
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_CHANNEL_OPEN_FAILURE);
        w.u32(sender);
        w.u32(numbers::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED);
        w.string(b"");
        w.string(b"");
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }

    fn send_channel_failure(&mut self, connection: &mut ServerConnection, channel: u32) {
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_CHANNEL_FAILURE);
        w.u32(channel);
        connection.send_plaintext_packet(Packet { payload: w.finish() });
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_message(packet: &Packet) -> Result<Option<Message>> {
    match packet.packet_type() {
        numbers::SSH_MSG_USERAUTH_REQUEST => Ok(Some(parse_auth_request(&packet.payload)?)),
        numbers::SSH_MSG_SERVICE_REQUEST => Ok(Some(parse_service_request(&packet.payload)?)),
        numbers::SSH_MSG_CHANNEL_OPEN => Ok(Some(parse_channel_open(&packet.payload)?)),
        numbers::SSH_MSG_CHANNEL_REQUEST => Ok(Some(parse_channel_request(&packet.payload)?)),
        packet_type => {
            tracing::warn!(
                packet_type,
                name = numbers::packet_type_to_string(packet_type),
                "dropping packet outside the message dispatcher's scope"
            );
            Ok(None)
        }
    }
}

fn parse_auth_request(payload: &[u8]) -> Result<Message> {
    let mut r = Reader::new(&payload[1..]);
    let username = r.utf8_string()?;
    let service = r.utf8_string()?;
    let method_name = r.utf8_string()?;
    let method = match method_name.as_str() {
        "none" => AuthMethod::None,
        "password" => {
            let change_password = r.bool()?;
            let password = r.utf8_string()?;
            let new_password = if change_password {
                Some(r.utf8_string()?)
            } else {
                None
            };
            AuthMethod::Password {
                password,
                new_password,
            }
        }
        "publickey" => {
            let has_signature = r.bool()?;
            let algorithm = r.utf8_string()?;
            let blob = r.string()?.to_vec();
            let signature = if has_signature {
                Some(r.string()?.to_vec())
            } else {
                None
            };
            AuthMethod::PublicKey {
                algorithm,
                blob,
                signature,
            }
        }
        "hostbased" => {
            let algorithm = r.utf8_string()?;
            let host_key_blob = r.string()?.to_vec();
            let client_hostname = r.utf8_string()?;
            let client_username = r.utf8_string()?;
            let signature = r.string()?.to_vec();
            AuthMethod::HostBased {
                algorithm,
                host_key_blob,
                client_hostname,
                client_username,
                signature,
            }
        }
        "keyboard-interactive" => {
            let language = r.utf8_string()?;
            let submethods = r.utf8_string()?;
            AuthMethod::KeyboardInteractive {
                language,
                submethods,
            }
        }
        other => AuthMethod::Other(other.to_string()),
    };
    Ok(Message::AuthRequest {
        username,
        service,
        method,
    })
}

fn parse_service_request(payload: &[u8]) -> Result<Message> {
    let mut r = Reader::new(&payload[1..]);
    let service = r.utf8_string()?;
    Ok(Message::ServiceRequest { service })
}

fn parse_channel_open(payload: &[u8]) -> Result<Message> {
    let mut r = Reader::new(&payload[1..]);
    let channel_type = r.utf8_string()?;
    let sender = r.u32()?;
    let initial_window = r.u32()?;
    let max_packet = r.u32()?;

    // RFC 4254 §7.2: direct-tcpip/forwarded-tcpip carry the forwarding
    // addresses after the common fields; every other channel type (just
    // "session" in this core, per the Non-goals) has nothing further.
    let (destination, destination_port, origin, origin_port) = match channel_type.as_str() {
        "direct-tcpip" | "forwarded-tcpip" => {
            let destination = r.utf8_string()?;
            let destination_port = r.u32()?;
            let origin = r.utf8_string()?;
            let origin_port = r.u32()?;
            (Some(destination), Some(destination_port), Some(origin), Some(origin_port))
        }
        _ => (None, None, None, None),
    };

    Ok(Message::ChannelOpen {
        channel_type,
        sender,
        initial_window,
        max_packet,
        origin,
        destination,
        origin_port,
        destination_port,
    })
}

fn parse_channel_request(payload: &[u8]) -> Result<Message> {
    let mut r = Reader::new(&payload[1..]);
    let channel = r.u32()?;
    let request_type = r.utf8_string()?;
    let want_reply = r.bool()?;
    let kind = match request_type.as_str() {
        "pty-req" => {
            let term = r.utf8_string()?;
            let width = r.u32()?;
            let height = r.u32()?;
            let pxwidth = r.u32()?;
            let pxheight = r.u32()?;
            let _modes = r.string()?;
            ChannelRequestKind::PtyReq {
                term,
                width,
                height,
                pxwidth,
                pxheight,
            }
        }
        "shell" => ChannelRequestKind::Shell,
        "exec" => ChannelRequestKind::Exec {
            command: r.utf8_string()?,
        },
        "subsystem" => ChannelRequestKind::Subsystem {
            subsystem: r.utf8_string()?,
        },
        "env" => {
            let env_name = r.utf8_string()?;
            let env_value = r.utf8_string()?;
            ChannelRequestKind::Env {
                env_name,
                env_value,
            }
        }
        "window-change" => {
            let width = r.u32()?;
            let height = r.u32()?;
            let pxwidth = r.u32()?;
            let pxheight = r.u32()?;
            ChannelRequestKind::WindowChange {
                width,
                height,
                pxwidth,
                pxheight,
            }
        }
        "signal" => ChannelRequestKind::Signal {
            name: r.utf8_string()?,
        },
        "exit-status" => ChannelRequestKind::ExitStatus {
            status: r.u32()?,
        },
        other => ChannelRequestKind::Other(other.to_string()),
    };
    Ok(Message::ChannelRequest {
        channel,
        request_type,
        want_reply,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with(build: impl FnOnce(&mut Writer)) -> Packet {
        let mut w = Writer::new();
        build(&mut w);
        Packet { payload: w.finish() }
    }

    #[test]
    fn parses_none_auth_request() {
        let packet = payload_with(|w| {
            w.u8(numbers::SSH_MSG_USERAUTH_REQUEST);
            w.string(b"alice");
            w.string(b"ssh-connection");
            w.string(b"none");
        });
        let message = parse_message(&packet).unwrap().unwrap();
        match message {
            Message::AuthRequest {
                username,
                service,
                method,
            } => {
                assert_eq!(username, "alice");
                assert_eq!(service, "ssh-connection");
                assert!(matches!(method, AuthMethod::None));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_publickey_query_without_signature() {
        let packet = payload_with(|w| {
            w.u8(numbers::SSH_MSG_USERAUTH_REQUEST);
            w.string(b"bob");
            w.string(b"ssh-connection");
            w.string(b"publickey");
            w.bool(false);
            w.string(b"ssh-rsa");
            w.string(b"blob-bytes");
        });
        let message = parse_message(&packet).unwrap().unwrap();
        let Message::AuthRequest { method, .. } = message else {
            panic!("expected AuthRequest")
        };
        let AuthMethod::PublicKey {
            algorithm,
            blob,
            signature,
        } = method
        else {
            panic!("expected PublicKey method")
        };
        assert_eq!(algorithm, "ssh-rsa");
        assert_eq!(blob, b"blob-bytes");
        assert!(signature.is_none());
    }

    #[test]
    fn parses_channel_open_session() {
        let packet = payload_with(|w| {
            w.u8(numbers::SSH_MSG_CHANNEL_OPEN);
            w.string(b"session");
            w.u32(7);
            w.u32(32768);
            w.u32(16384);
        });
        let message = parse_message(&packet).unwrap().unwrap();
        match message {
            Message::ChannelOpen {
                channel_type,
                sender,
                origin,
                ..
            } => {
                assert_eq!(channel_type, "session");
                assert_eq!(sender, 7);
                assert!(origin.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_channel_request_pty_req() {
        let packet = payload_with(|w| {
            w.u8(numbers::SSH_MSG_CHANNEL_REQUEST);
            w.u32(3);
            w.string(b"pty-req");
            w.bool(true);
            w.string(b"xterm");
            w.u32(80);
            w.u32(24);
            w.u32(0);
            w.u32(0);
            w.string(b"");
        });
        let message = parse_message(&packet).unwrap().unwrap();
        match message {
            Message::ChannelRequest {
                channel,
                want_reply,
                kind,
                ..
            } => {
                assert_eq!(channel, 3);
                assert!(want_reply);
                assert!(matches!(kind, ChannelRequestKind::PtyReq { .. }));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_packet_type_is_dropped_not_errored() {
        let packet = Packet {
            payload: vec![numbers::SSH_MSG_CHANNEL_DATA, 0, 0, 0, 0],
        };
        assert!(parse_message(&packet).unwrap().is_none());
    }

    #[test]
    fn default_auth_methods_render_in_source_order() {
        assert_eq!(AuthMethods::DEFAULT.name_list(), "publickey,password");
        let all = AuthMethods {
            publickey: true,
            keyboard_interactive: true,
            password: true,
            hostbased: true,
        };
        assert_eq!(all.name_list(), "publickey,keyboard-interactive,password,hostbased");
    }
}
