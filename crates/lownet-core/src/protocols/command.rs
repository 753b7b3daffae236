//! The signed command channel: a three-frame (SIGNED, SIG1, SIG2) exchange
//! that authenticates `TIME` and `TEST` commands against an embedded RSA
//! public key.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::crypto::{self, SigningKey};
use crate::error::{LinkError, Result};
use crate::frame::PlainFrame;
use crate::link::LinkCore;
use crate::time::Time;

use super::ping::PingChannel;
use super::PROTOCOL_COMMAND;

const CMD_HEADER_SIZE: usize = 12;
const CMD_PAYLOAD_SIZE: usize = crate::frame::PAYLOAD_SIZE - CMD_HEADER_SIZE;
const SIGNATURE_SIZE: usize = 256;
const SIG_HALF: usize = SIGNATURE_SIZE / 2;
const HASH_SIZE: usize = 32;
const TIMEOUT: Time = Time {
    seconds: 10,
    parts: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameType {
    Unsigned,
    Signed,
    Sig1,
    Sig2,
}

impl FrameType {
    fn of(protocol: u8) -> FrameType {
        match (protocol & 0b1100_0000) >> 6 {
            0b00 => FrameType::Unsigned,
            0b01 => FrameType::Signed,
            0b10 => FrameType::Sig1,
            _ => FrameType::Sig2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandType {
    Time = 0x01,
    Test = 0x02,
}

impl CommandType {
    fn from_u8(v: u8) -> Option<CommandType> {
        match v {
            0x01 => Some(CommandType::Time),
            0x02 => Some(CommandType::Test),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Listening,
    WaitSig,
    WaitSig1,
    WaitSig2,
}

struct CmdPacket {
    sequence: u64,
    kind: u8,
    contents: [u8; CMD_PAYLOAD_SIZE],
}

impl CmdPacket {
    fn from_payload(payload: &[u8]) -> CmdPacket {
        let sequence = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let kind = payload[8];
        let mut contents = [0u8; CMD_PAYLOAD_SIZE];
        contents.copy_from_slice(&payload[CMD_HEADER_SIZE..CMD_HEADER_SIZE + CMD_PAYLOAD_SIZE]);
        CmdPacket {
            sequence,
            kind,
            contents,
        }
    }
}

struct CmdSignature {
    hash_key: [u8; HASH_SIZE],
    hash_msg: [u8; HASH_SIZE],
    sig_part: [u8; SIG_HALF],
}

impl CmdSignature {
    fn from_payload(payload: &[u8]) -> CmdSignature {
        let mut hash_key = [0u8; HASH_SIZE];
        hash_key.copy_from_slice(&payload[0..HASH_SIZE]);
        let mut hash_msg = [0u8; HASH_SIZE];
        hash_msg.copy_from_slice(&payload[HASH_SIZE..HASH_SIZE * 2]);
        let mut sig_part = [0u8; SIG_HALF];
        sig_part.copy_from_slice(&payload[HASH_SIZE * 2..HASH_SIZE * 2 + SIG_HALF]);
        CmdSignature {
            hash_key,
            hash_msg,
            sig_part,
        }
    }
}

struct CommandState {
    state: State,
    last_valid: u64,
    command_received: Time,
    current_cmd: Option<PlainFrame>,
    hash: [u8; HASH_SIZE],
    signature: [u8; SIGNATURE_SIZE],
}

impl CommandState {
    fn fresh() -> CommandState {
        CommandState {
            state: State::Listening,
            last_valid: 0,
            command_received: Time::ZERO,
            current_cmd: None,
            hash: [0u8; HASH_SIZE],
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    fn ready_next(&mut self) {
        let last_valid = self.last_valid;
        *self = CommandState::fresh();
        self.last_valid = last_valid;
    }
}

pub struct CommandChannel {
    core: Arc<LinkCore>,
    ping: Arc<PingChannel>,
    signing_key: SigningKey,
    state: Mutex<CommandState>,
}

impl CommandChannel {
    pub fn register(
        core: Arc<LinkCore>,
        ping: Arc<PingChannel>,
        signing_key_pem: &str,
    ) -> Result<Arc<CommandChannel>> {
        let signing_key = SigningKey::from_pem(signing_key_pem)
            .map_err(|e| LinkError::InvalidSigningKey(e.to_string()))?;

        let channel = Arc::new(CommandChannel {
            core: core.clone(),
            ping,
            signing_key,
            state: Mutex::new(CommandState::fresh()),
        });
        let receiver = Arc::clone(&channel);
        core.register_handler(PROTOCOL_COMMAND, move |frame| receiver.on_frame(frame))?;
        Ok(channel)
    }

    fn on_frame(&self, frame: &PlainFrame) {
        match FrameType::of(frame.protocol) {
            FrameType::Unsigned => {}
            FrameType::Signed => self.handle_command_frame(frame),
            FrameType::Sig1 => self.handle_signature_frame(frame, FrameType::Sig1),
            FrameType::Sig2 => self.handle_signature_frame(frame, FrameType::Sig2),
        }
    }

    fn handle_command_frame(&self, frame: &PlainFrame) {
        let command = CmdPacket::from_payload(&frame.payload);
        let mut state = self.state.lock().unwrap();
        if command.sequence < state.last_valid {
            return;
        }
        state.ready_next();

        state.command_received = self.core.get_time();
        state.hash = crypto::sha256(&frame.to_bytes());
        state.current_cmd = Some(frame.clone());
        state.state = State::WaitSig;
    }

    fn handle_signature_frame(&self, frame: &PlainFrame, kind: FrameType) {
        let signature = CmdSignature::from_payload(&frame.payload);
        let mut state = self.state.lock().unwrap();

        if !crypto::constant_time_eq(&signature.hash_msg, &state.hash) {
            return;
        }

        let now = self.core.get_time();
        let elapsed = now.diff(state.command_received);
        if elapsed > TIMEOUT {
            state.ready_next();
            return;
        }

        if !crypto::constant_time_eq(&signature.hash_key, &self.signing_key.pem_hash) {
            return;
        }

        match kind {
            FrameType::Sig1 => self.handle_part1(&mut state, &signature),
            FrameType::Sig2 => self.handle_part2(&mut state, &signature),
            _ => unreachable!(),
        }
    }

    fn handle_part1(&self, state: &mut CommandState, signature: &CmdSignature) {
        state.signature[0..SIG_HALF].copy_from_slice(&signature.sig_part);
        match state.state {
            State::WaitSig => state.state = State::WaitSig2,
            State::WaitSig1 => self.try_verify_and_execute(state),
            _ => {}
        }
    }

    fn handle_part2(&self, state: &mut CommandState, signature: &CmdSignature) {
        state.signature[SIG_HALF..SIGNATURE_SIZE].copy_from_slice(&signature.sig_part);
        match state.state {
            State::WaitSig => state.state = State::WaitSig1,
            State::WaitSig2 => self.try_verify_and_execute(state),
            _ => {}
        }
    }

    fn try_verify_and_execute(&self, state: &mut CommandState) {
        if !self.verify_signature(state) {
            warn!("command signature verification failed, discarding");
            state.ready_next();
            return;
        }

        let Some(frame) = state.current_cmd.clone() else {
            state.ready_next();
            return;
        };
        let command = CmdPacket::from_payload(&frame.payload);
        state.last_valid = command.sequence;
        state.ready_next();

        self.execute(&frame, &command);
    }

    fn verify_signature(&self, state: &CommandState) -> bool {
        let mut sig_bytes = [0u8; SIGNATURE_SIZE];
        sig_bytes.copy_from_slice(&state.signature);
        let transformed = self.signing_key.raw_public_transform(&sig_bytes);

        let mut expected = [0u8; SIGNATURE_SIZE];
        expected[220..224].fill(1);
        expected[224..256].copy_from_slice(&state.hash);

        crypto::constant_time_eq(&transformed, &expected)
    }

    fn execute(&self, frame: &PlainFrame, command: &CmdPacket) {
        match CommandType::from_u8(command.kind) {
            Some(CommandType::Time) => {
                let time = Time::from_bytes(command.contents[0..5].try_into().unwrap());
                debug!(?time, "applying signed TIME command");
                self.core.set_time(time);
            }
            Some(CommandType::Test) => {
                let content_len = (frame.length as usize)
                    .saturating_sub(CMD_HEADER_SIZE)
                    .min(CMD_PAYLOAD_SIZE);
                let _ = self.ping.ping(frame.source, &command.contents[..content_len]);
            }
            None => {}
        }
    }
}
