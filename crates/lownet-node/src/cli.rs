//! The interactive command line: `/command args`, `@id message`, or a bare
//! line (broadcast chat), mirroring the firmware's quick-and-dirty parser.

use std::sync::{Arc, Mutex};

use lownet_core::keystore::Keystore;
use lownet_core::link::LinkCore;
use lownet_core::protocols::chat::ChatChannel;
use lownet_core::protocols::command::CommandChannel;
use lownet_core::protocols::crane::{actions, CraneChannel};
use lownet_core::protocols::ping::PingChannel;
use lownet_core::protocols::format_id;
use lownet_core::util::parse_node_id;
use tracing::info;

pub struct Commands {
    pub core: Arc<LinkCore>,
    pub chat: Arc<ChatChannel>,
    pub ping: Arc<PingChannel>,
    pub crane: Arc<CraneChannel>,
    pub command: Arc<CommandChannel>,
    pub keystore: Mutex<Keystore>,
}

const HELP: &[&str] = &[
    "/shout MSG                   Broadcast a message.",
    "/tell ID MSG or @ID MSG      Send a message to a specific node",
    "/ping ID                     Check if a node is online",
    "/date                        Print the current time",
    "/setkey [0|1]                Set the encryption key to use. If no key is provided encryption is disabled",
    "/id                          Print your ID",
    "/testenc [STR]               Run STR through a encrypt/decrypt cycle to verify that encryption works",
    "/crane COMMAND                /crane help for details",
    "/help                        Print this help",
];

impl Commands {
    /// Parses and executes one line of input, exactly as `app_main`'s read
    /// loop does: `/` dispatches a named command, `@` is shorthand for
    /// `tell`, anything else is a broadcast.
    pub async fn dispatch(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let name = parts.next().unwrap_or("");
            let args = parts.next();
            self.run(name, args).await;
        } else if let Some(rest) = line.strip_prefix('@') {
            self.run("tell", Some(rest)).await;
        } else {
            self.run("shout", Some(line)).await;
        }
    }

    async fn run(&self, name: &str, args: Option<&str>) {
        match name {
            "shout" => self.shout(args),
            "tell" => self.tell(args),
            "ping" => self.ping(args),
            "date" => self.date(),
            "setkey" => self.setkey(args),
            "id" => self.id(),
            "testenc" => self.testenc(args),
            "crane" => self.crane(args).await,
            "help" => self.help(),
            _ => info!("Invalid command: {name}"),
        }
    }

    fn shout(&self, args: Option<&str>) {
        let Some(msg) = args else {
            info!("Missing argument MSG");
            return;
        };
        let _ = self.chat.shout(msg);
    }

    fn tell(&self, args: Option<&str>) {
        let Some(args) = args else {
            info!("Missing argument ID");
            return;
        };
        let mut parts = args.splitn(2, ' ');
        let Some(id_str) = parts.next() else {
            info!("Missing argument ID");
            return;
        };
        let Some(id) = parse_node_id(id_str) else {
            info!("Invalid ID: {id_str}");
            return;
        };
        let Some(msg) = parts.next() else {
            info!("Missing argument MSG");
            return;
        };
        let _ = self.chat.tell(msg, id);
    }

    fn ping(&self, args: Option<&str>) {
        let Some(id_str) = args else {
            info!("Missing argument ID");
            return;
        };
        let Some(id) = parse_node_id(id_str.trim()) else {
            info!("Invalid ID: {id_str}");
            return;
        };
        let _ = self.ping.ping(id, &[]);
    }

    fn date(&self) {
        let now = self.core.get_time();
        if now.seconds == 0 && now.parts == 0 {
            info!("not available");
        } else {
            info!("{}", now.format_rtt());
        }
    }

    fn setkey(&self, args: Option<&str>) {
        let slot = args.and_then(|s| s.trim().parse::<u8>().ok());
        let key = match slot {
            None => None,
            Some(slot) => match self.keystore.lock().unwrap().read(slot) {
                Some(key) => Some(key),
                None => {
                    info!("No key loaded in slot {slot}");
                    return;
                }
            },
        };
        lownet_core::link::activate_key(&self.core, key);
    }

    fn id(&self) {
        info!("{}", format_id(self.core.local_id()));
    }

    fn testenc(&self, args: Option<&str>) {
        let message = args.unwrap_or("the quick brown fox");
        let key = self.keystore.lock().unwrap().read(0).unwrap_or([0u8; 32]);
        let mut plain = message.as_bytes().to_vec();
        while !plain.len().is_multiple_of(16) {
            plain.push(0);
        }
        let iv = [0u8; 16];
        let cipher = lownet_core::crypto::aes256_cbc_encrypt(&key, &iv, &plain);
        let recovered = lownet_core::crypto::aes256_cbc_decrypt(&key, &iv, &cipher);
        if recovered == plain {
            info!("encrypt/decrypt roundtrip OK");
        } else {
            info!("encrypt/decrypt roundtrip FAILED");
        }
    }

    fn help(&self) {
        for line in HELP {
            info!("{line}");
        }
        info!("Any input not preceded by a '/' or '@' will be treated as a broadcast message.");
    }

    async fn crane(&self, args: Option<&str>) {
        let Some(args) = args else {
            info!("Missing argument COMMAND");
            return;
        };
        let mut parts = args.splitn(2, ' ');
        let Some(command) = parts.next() else {
            info!("Missing argument COMMAND");
            return;
        };
        let rest = parts.next();

        match command {
            "help" => {
                info!("open ID    Connect to a crane at ID");
                info!("close      Close an existing connection");
                info!("test ID    Connect to ID in test mode and execute test pattern");
                info!("CMD        Implementation defined commands to trigger crane actions");
            }
            "open" => {
                let Some(id) = rest.and_then(parse_node_id) else {
                    info!("Missing argument ID");
                    return;
                };
                self.crane.connect(id);
            }
            "close" => self.crane.disconnect().await,
            "test" => {
                let Some(id) = rest.and_then(parse_node_id) else {
                    info!("Missing argument ID");
                    return;
                };
                self.crane.run_test(id).await;
            }
            other => {
                let action = match other.chars().next() {
                    Some('f') => actions::FWD,
                    Some('b') => actions::REV,
                    Some('u') => actions::UP,
                    Some('d') => actions::DOWN,
                    Some('o') => actions::LIGHT_ON,
                    Some('O') => actions::LIGHT_OFF,
                    Some('s') => actions::STOP,
                    _ => {
                        info!("Invalid crane command");
                        return;
                    }
                };
                let _ = self.crane.action(action).await;
            }
        }
    }
}
