//! The Session State Machine and server-role Key Exchange Engine (§4.2,
//! §4.3): drives one accepted connection from banner exchange through DH
//! key exchange to the `Authenticating` state where the Message Dispatcher
//! takes over.

use std::collections::VecDeque;

use ssh_crypto::{
    derive_keys, AlgorithmName, EncryptionAlgorithm, KexAlgorithm, MacAlgorithm, SessionKeys,
    SshRng, SupportedAlgorithms,
};
use ssh_format::{numbers, NameList, Reader};
use ssh_keys::private::PlaintextPrivateKey;
use ssh_keys::public::PublicKey;
use ssh_keys::KeyAlgorithm;
use tracing::{debug, info, trace, warn};

use crate::packet::{
    validate_banner_is_ssh2, DhKeyExchangeInitPacket, DhKeyExchangeReplyPacket,
    KeyExchangeInitPacket, Packet, PacketTransport, ProtocolIdentParser,
};
use crate::{Msg, Result, SessionId, SshStatus, TransportError};

/// A 0.0-1.0 progress signal fired at the fixed checkpoints of §4.3.
pub trait ProgressHook: Send {
    fn progress(&mut self, fraction: f32);
}
impl ProgressHook for () {
    fn progress(&mut self, _: f32) {}
}
impl<F: FnMut(f32) + Send> ProgressHook for F {
    fn progress(&mut self, fraction: f32) {
        self(fraction)
    }
}

#[derive(Clone, Default)]
pub struct ServerConfig {
    pub server_identification: Vec<u8>,
}

/// The two host-key slots of §3: each is a private key or empty. Cleared
/// in full after the DH reply is emitted (§4.2 step 9, §8 invariant).
#[derive(Default)]
pub struct HostKeySlots {
    pub rsa: Option<PlaintextPrivateKey>,
    pub dsa: Option<PlaintextPrivateKey>,
}

impl HostKeySlots {
    pub fn is_empty(&self) -> bool {
        self.rsa.is_none() && self.dsa.is_none()
    }

    fn public_keys(&self) -> Vec<PublicKey> {
        let mut out = Vec::new();
        if let Some(k) = &self.dsa {
            out.push(k.private_key.public_key());
        }
        if let Some(k) = &self.rsa {
            out.push(k.private_key.public_key());
        }
        out
    }

    /// §4.2 step 4: select the private key by negotiated host-key
    /// algorithm, failing fatally if the slot is empty. This check is the
    /// explicit addition called for in DESIGN.md's host-key-availability
    /// open question.
    fn take_for_algorithm(&mut self, algorithm: KeyAlgorithm) -> Result<PlaintextPrivateKey> {
        let slot = match algorithm {
            KeyAlgorithm::Rsa => &mut self.rsa,
            KeyAlgorithm::Dsa => &mut self.dsa,
        };
        slot.take().ok_or_else(|| {
            SshStatus::Fatal(TransportError::Config(format!(
                "no {} host key loaded, cannot negotiate it",
                algorithm.name()
            )))
        })
    }

    /// §4.2 step 9: clear both slots regardless of which one signed.
    fn clear(&mut self) {
        self.rsa = None;
        self.dsa = None;
    }
}

/// Builds this server's own `SSH_MSG_KEXINIT` payload: every slot carries
/// the *full* ordered preference list (§4.7), not a single pre-negotiated
/// choice -- negotiation only happens once the peer's own list is known.
fn build_server_kexinit(algs: &SupportedAlgorithms, rng: &mut dyn SshRng) -> Vec<u8> {
    let mut cookie = [0u8; 16];
    rng.fill_bytes(&mut cookie);

    let kex_list = algs.kex.to_name_list();
    let host_key_list = algs.host_key.to_name_list();
    let cipher_c2s_list = algs.cipher_c2s.to_name_list();
    let cipher_s2c_list = algs.cipher_s2c.to_name_list();
    let mac_c2s_list = algs.mac_c2s.to_name_list();
    let mac_s2c_list = algs.mac_s2c.to_name_list();
    let compression_c2s_list = algs.compression_c2s.to_name_list();
    let compression_s2c_list = algs.compression_s2c.to_name_list();
    let language_c2s_list = algs.language_c2s.to_name_list();
    let language_s2c_list = algs.language_s2c.to_name_list();

    KeyExchangeInitPacket {
        cookie,
        kex_algorithms: NameList::multi(&kex_list),
        server_host_key_algorithms: NameList::multi(&host_key_list),
        encryption_algorithms_client_to_server: NameList::multi(&cipher_c2s_list),
        encryption_algorithms_server_to_client: NameList::multi(&cipher_s2c_list),
        mac_algorithms_client_to_server: NameList::multi(&mac_c2s_list),
        mac_algorithms_server_to_client: NameList::multi(&mac_s2c_list),
        compression_algorithms_client_to_server: NameList::multi(&compression_c2s_list),
        compression_algorithms_server_to_client: NameList::multi(&compression_s2c_list),
        languages_client_to_server: NameList::multi(&language_c2s_list),
        languages_server_to_client: NameList::multi(&language_s2c_list),
        first_kex_packet_follows: false,
    }
    .to_bytes()
}

enum ServerState {
    SocketConnected {
        ident_parser: ProtocolIdentParser,
    },
    InitialKex {
        client_ident: Vec<u8>,
        server_kexinit: Vec<u8>,
    },
    Dh(Box<DhState>),
    Authenticating {
        session_id: SessionId,
    },
    Error,
    Disconnected,
}

struct DhState {
    client_ident: Vec<u8>,
    client_kexinit: Vec<u8>,
    server_kexinit: Vec<u8>,
    kex_algorithm: KexAlgorithm,
    host_key_algorithm: KeyAlgorithm,
    cipher_c2s: EncryptionAlgorithm,
    cipher_s2c: EncryptionAlgorithm,
    mac_c2s: MacAlgorithm,
    mac_s2c: MacAlgorithm,
    sub_state: DhSubState,
}

/// §4.2: the DH sub-state of the Key Exchange Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhSubState {
    Init,
    InitSent,
    NewkeysSent,
    Finished,
}

/// The session keys derived after `KEXDH_REPLY` but not yet installed;
/// applied to the wire the moment the peer's `NEWKEYS` arrives.
struct PendingKeys {
    keys: SessionKeys,
    cipher_c2s: EncryptionAlgorithm,
    cipher_s2c: EncryptionAlgorithm,
    mac_c2s: MacAlgorithm,
    mac_s2c: MacAlgorithm,
}

pub struct ServerConnection {
    state: ServerState,
    packet_transport: PacketTransport,
    rng: Box<dyn SshRng + Send + Sync>,
    config: ServerConfig,
    host_keys: HostKeySlots,
    progress: Box<dyn ProgressHook>,
    /// Immutable once assigned (§3, §8 invariant).
    session_id: Option<SessionId>,
    pending_keys: Option<PendingKeys>,
    plaintext_packets: VecDeque<Packet>,
    last_error: Option<String>,
}

impl ServerConnection {
    pub fn new(
        rng: impl SshRng + Send + Sync + 'static,
        config: ServerConfig,
        host_keys: HostKeySlots,
    ) -> Self {
        Self {
            state: ServerState::SocketConnected {
                ident_parser: ProtocolIdentParser::new(),
            },
            packet_transport: PacketTransport::new(),
            rng: Box::new(rng),
            config,
            host_keys,
            progress: Box::new(()),
            session_id: None,
            pending_keys: None,
            plaintext_packets: VecDeque::new(),
            last_error: None,
        }
    }

    pub fn set_progress_hook(&mut self, hook: impl ProgressHook + 'static) {
        self.progress = Box::new(hook);
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.state, ServerState::Error | ServerState::Disconnected)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_authenticating(&self) -> Option<SessionId> {
        match self.state {
            ServerState::Authenticating { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn next_msg_to_send(&mut self) -> Option<Msg> {
        self.packet_transport.next_msg_to_send()
    }

    pub fn next_plaintext_packet(&mut self) -> Option<Packet> {
        self.plaintext_packets.pop_front()
    }

    pub fn send_plaintext_packet(&mut self, packet: Packet) {
        self.packet_transport.queue_packet(packet);
    }

    /// Feeds newly arrived socket bytes into the session, running the
    /// state machine to completion for everything fully buffered.
    pub fn recv_bytes(&mut self, bytes: &[u8]) -> std::result::Result<(), ()> {
        match self.recv_bytes_inner(bytes) {
            Ok(()) => Ok(()),
            Err(SshStatus::Disconnect) => {
                self.state = ServerState::Disconnected;
                Err(())
            }
            Err(SshStatus::Fatal(err)) => {
                warn!(%err, "session entering Error state");
                self.last_error = Some(err.to_string());
                self.packet_transport.reset_outbound();
                self.state = ServerState::Error;
                Err(())
            }
        }
    }

    fn recv_bytes_inner(&mut self, mut bytes: &[u8]) -> Result<()> {
        if let ServerState::SocketConnected { ident_parser } = &mut self.state {
            let consumed = ident_parser.recv_bytes(bytes)?;
            bytes = &bytes[consumed..];
            if let Some(client_ident) = ident_parser.get_peer_ident() {
                validate_banner_is_ssh2(&client_ident)?;
                self.progress.progress(0.4);
                self.packet_transport
                    .queue_send_protocol_info(self.config.server_identification.clone());

                // `BannerReceived` -> emit our own `SSH_MSG_KEXINIT` right
                // away, independent of whatever the peer offers (§4.3) --
                // both sides announce their full preference lists without
                // waiting on each other.
                let algs = SupportedAlgorithms::defaults(&self.host_keys.public_keys());
                if algs.host_key.supported.is_empty() {
                    return Err(SshStatus::Fatal(TransportError::Config(
                        "no host keys configured".into(),
                    )));
                }
                let server_kexinit = build_server_kexinit(&algs, &mut *self.rng);
                self.packet_transport.queue_packet(Packet {
                    payload: server_kexinit.clone(),
                });
                self.progress.progress(0.5);

                self.state = ServerState::InitialKex {
                    client_ident,
                    server_kexinit,
                };
            } else {
                return Ok(());
            }
        }

        // A single call: `PacketTransport::recv_bytes` already drains every
        // complete packet `bytes` contains and buffers any trailing partial
        // packet internally. Its returned count only reflects whole packets
        // consumed, not the partial tail it has already decrypted and
        // stored -- re-feeding the leftover slice back in (as a `loop`
        // keyed on that count used to do) would decrypt those bytes a
        // second time against an already-advanced keystream and corrupt
        // the stream the moment a read contains a complete packet followed
        // by the start of another (the common case once traffic flows
        // post-`NEWKEYS`).
        self.packet_transport.recv_bytes(bytes)?;

        while let Some(packet) = self.packet_transport.recv_next_packet() {
            self.handle_packet(packet)?;
        }

        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        let packet_type = packet.packet_type();
        trace!(
            packet_type,
            name = numbers::packet_type_to_string(packet_type),
            "received packet"
        );

        // These three are handled the same regardless of state (§4.3).
        match packet_type {
            numbers::SSH_MSG_DISCONNECT => {
                let mut r = Reader::new(&packet.payload[1..]);
                let reason = r.u32()?;
                let description = r.utf8_string()?;
                debug!(
                    reason,
                    name = numbers::disconnect_reason_to_string(reason),
                    %description,
                    "peer disconnecting"
                );
                return Err(SshStatus::Disconnect);
            }
            numbers::SSH_MSG_IGNORE => {
                let mut r = Reader::new(&packet.payload[1..]);
                let _ = r.string()?;
                return Ok(());
            }
            numbers::SSH_MSG_DEBUG => {
                let mut r = Reader::new(&packet.payload[1..]);
                let always_display = r.bool()?;
                let msg = r.utf8_string()?;
                if always_display {
                    info!(%msg, "SSH_MSG_DEBUG");
                } else {
                    debug!(%msg, "SSH_MSG_DEBUG");
                }
                return Ok(());
            }
            _ => {}
        }

        match std::mem::replace(&mut self.state, ServerState::Error) {
            ServerState::SocketConnected { .. } => unreachable!("handled before dispatch"),
            ServerState::InitialKex {
                client_ident,
                server_kexinit,
            } => {
                self.state = self.handle_kexinit(client_ident, server_kexinit, packet)?;
            }
            ServerState::Dh(dh_state) => {
                self.state = self.handle_dh_packet(*dh_state, packet)?;
            }
            ServerState::Authenticating { session_id } => {
                self.plaintext_packets.push_back(packet);
                self.state = ServerState::Authenticating { session_id };
            }
            ServerState::Error => return Err(crate::peer_error!("session already in error state")),
            ServerState::Disconnected => return Err(SshStatus::Disconnect),
        }
        Ok(())
    }

    /// `InitialKex`/`KexinitReceived` -> `Dh` (§4.3, §4.7). Our own
    /// `SSH_MSG_KEXINIT` was already sent the moment the banner completed;
    /// `server_kexinit` is that payload, carried along so the exchange hash
    /// in §4.2 step 7 hashes exactly what went out on the wire.
    fn handle_kexinit(
        &mut self,
        client_ident: Vec<u8>,
        server_kexinit: Vec<u8>,
        packet: Packet,
    ) -> Result<ServerState> {
        let kex = KeyExchangeInitPacket::parse(&packet.payload)?;
        debug!("KEXINIT received from peer");
        self.progress.progress(0.6);

        let algs = SupportedAlgorithms::defaults(&self.host_keys.public_keys());
        if algs.host_key.supported.is_empty() {
            return Err(SshStatus::Fatal(TransportError::Config(
                "no host keys configured".into(),
            )));
        }

        let kex_algorithm = algs
            .kex
            .find(kex.kex_algorithms)
            .map_err(TransportError::from)?;
        let host_key_alg = algs
            .host_key
            .find(kex.server_host_key_algorithms)
            .map_err(TransportError::from)?;
        let host_key_algorithm = KeyAlgorithm::from_name(host_key_alg.name())
            .expect("negotiated name always one of ssh-rsa/ssh-dss");
        let cipher_c2s = algs
            .cipher_c2s
            .find(kex.encryption_algorithms_client_to_server)
            .map_err(TransportError::from)?;
        let cipher_s2c = algs
            .cipher_s2c
            .find(kex.encryption_algorithms_server_to_client)
            .map_err(TransportError::from)?;
        let mac_c2s = algs
            .mac_c2s
            .find(kex.mac_algorithms_client_to_server)
            .map_err(TransportError::from)?;
        let mac_s2c = algs
            .mac_s2c
            .find(kex.mac_algorithms_server_to_client)
            .map_err(TransportError::from)?;
        let _compression_c2s = algs
            .compression_c2s
            .find(kex.compression_algorithms_client_to_server)
            .map_err(TransportError::from)?;
        let _compression_s2c = algs
            .compression_s2c
            .find(kex.compression_algorithms_server_to_client)
            .map_err(TransportError::from)?;

        debug!(
            kex = kex_algorithm.name(),
            host_key = host_key_algorithm.name(),
            cipher_c2s = cipher_c2s.name(),
            cipher_s2c = cipher_s2c.name(),
            "algorithms negotiated"
        );
        self.progress.progress(0.8);

        Ok(ServerState::Dh(Box::new(DhState {
            client_ident,
            client_kexinit: packet.payload,
            server_kexinit,
            kex_algorithm,
            host_key_algorithm,
            cipher_c2s,
            cipher_s2c,
            mac_c2s,
            mac_s2c,
            sub_state: DhSubState::Init,
        })))
    }

    /// The Key Exchange Engine proper (§4.2) plus the `NEWKEYS` cutover
    /// that ends it.
    fn handle_dh_packet(&mut self, mut dh: DhState, packet: Packet) -> Result<ServerState> {
        match (dh.sub_state, packet.packet_type()) {
            (DhSubState::Init, numbers::SSH_MSG_KEXDH_INIT) => {
                self.do_kexdh_reply(&mut dh, &packet)?;
                dh.sub_state = DhSubState::NewkeysSent;
                Ok(ServerState::Dh(Box::new(dh)))
            }
            (sub_state, numbers::SSH_MSG_KEXDH_INIT) => {
                // §8 boundary behavior: ignored without state change.
                debug!(?sub_state, "ignoring KEXDH_INIT outside of Init sub-state");
                Ok(ServerState::Dh(Box::new(dh)))
            }
            (DhSubState::NewkeysSent, numbers::SSH_MSG_NEWKEYS) => {
                dh.sub_state = DhSubState::Finished;
                let pending = self
                    .pending_keys
                    .take()
                    .expect("keys derived in do_kexdh_reply before NEWKEYS is sent");
                self.packet_transport.set_keys(
                    pending.keys.server_to_client,
                    pending.cipher_s2c,
                    pending.mac_s2c,
                    pending.keys.client_to_server,
                    pending.cipher_c2s,
                    pending.mac_c2s,
                );
                self.progress.progress(1.0);
                let session_id = self.session_id.expect("set during do_kexdh_reply");
                info!("key exchange complete, session authenticating");
                Ok(ServerState::Authenticating { session_id })
            }
            (sub_state, packet_type) => Err(crate::peer_error!(
                "unexpected packet {packet_type} in DH sub-state {sub_state:?}"
            )),
        }
    }

    fn do_kexdh_reply(&mut self, dh: &mut DhState, packet: &Packet) -> Result<()> {
        // Step 1: extract e, failing fatally if absent.
        let init = DhKeyExchangeInitPacket::parse(&packet.payload)?;
        let e = init.e.as_positive_bytes().to_vec();

        // Step 3: fresh y, f.
        let secret = dh.kex_algorithm.generate_secret(&mut *self.rng);

        // Step 4: select private key by negotiated host-key algorithm,
        // failing fatally if the slot is empty.
        let private_key = self.host_keys.take_for_algorithm(dh.host_key_algorithm)?;

        // Step 5: derive and serialize the public key.
        let public_key = private_key.private_key.public_key();
        let host_key_blob = public_key.to_wire_encoding();

        // Step 2 + step 6: validate e, compute K = e^y mod p.
        let shared_secret = secret
            .compute_k(&e)
            .map_err(|err| SshStatus::Fatal(TransportError::Crypto(err.to_string())))?;

        let f = secret.f_bytes();

        // Step 7: exchange hash H.
        let hash = ssh_crypto::key_exchange_hash(
            &dh.client_ident,
            &self.config.server_identification,
            &dh.client_kexinit,
            &dh.server_kexinit,
            &host_key_blob,
            &e,
            &f,
            &shared_secret,
        );
        if self.session_id.is_none() {
            self.session_id = Some(SessionId(hash));
        }
        let session_id = self.session_id.unwrap();

        // Step 8: sign H.
        let signature = private_key.sign(&hash);

        // Step 9: clear both host-key slots, regardless of which signed.
        self.host_keys.clear();

        // Step 10: emit KEXDH_REPLY.
        let reply = DhKeyExchangeReplyPacket {
            host_key_blob,
            f,
            signature_blob: signature.to_wire_encoding(),
        };
        self.packet_transport.queue_packet(reply.to_packet());

        // Derive session keys now so NEWKEYS can cut over immediately once
        // the peer's NEWKEYS arrives.
        let keys = derive_keys(
            &shared_secret,
            hash,
            session_id.0,
            dh.cipher_c2s,
            dh.cipher_s2c,
            dh.mac_c2s,
            dh.mac_s2c,
        );
        self.pending_keys = Some(PendingKeys {
            keys,
            cipher_c2s: dh.cipher_c2s,
            cipher_s2c: dh.cipher_s2c,
            mac_c2s: dh.mac_c2s,
            mac_s2c: dh.mac_s2c,
        });

        // Step 11: emit NEWKEYS, advance sub-state (done by caller).
        self.packet_transport.queue_packet(Packet {
            payload: vec![numbers::SSH_MSG_NEWKEYS],
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRng;
    impl SshRng for NoRng {
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
    }

    fn rsa_host_key() -> HostKeySlots {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        HostKeySlots {
            rsa: Some(PlaintextPrivateKey {
                private_key: ssh_keys::private::PrivateKey::Rsa(key),
            }),
            dsa: None,
        }
    }

    #[test]
    fn banner_then_kexinit_progress() {
        let mut con = ServerConnection::new(
            NoRng,
            ServerConfig {
                server_identification: b"SSH-2.0-ssh-transport_0.1\r\n".to_vec(),
            },
            rsa_host_key(),
        );
        con.recv_bytes(b"SSH-2.0-OpenSSH_9.7\r\n").unwrap();
        let banner = con.next_msg_to_send();
        assert!(matches!(banner, Some(Msg::ServerProtocolInfo(_))));
        let kexinit = con.next_msg_to_send();
        assert!(matches!(kexinit, Some(Msg::PlaintextPacket(_))));
        assert!(con.next_msg_to_send().is_none());
    }

    #[test]
    fn banner_without_host_keys_errors() {
        let mut con = ServerConnection::new(
            NoRng,
            ServerConfig {
                server_identification: b"SSH-2.0-ssh-transport_0.1\r\n".to_vec(),
            },
            HostKeySlots::default(),
        );
        assert!(con.recv_bytes(b"SSH-2.0-OpenSSH_9.7\r\n").is_err());
        assert!(!con.is_alive());
        assert!(con.next_msg_to_send().is_none());
    }

    #[test]
    fn host_key_slots_clear_after_take() {
        let mut slots = HostKeySlots::default();
        assert!(slots.is_empty());
        assert!(slots.take_for_algorithm(KeyAlgorithm::Rsa).is_err());
    }
}
