/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;

use ipmitool_rs::commands::mc::McCommand;
use ipmitool_rs::ipmi::intf::{
    IPMI_SESSION_AUTHTYPE_MD2, IPMI_SESSION_AUTHTYPE_MD5, IPMI_SESSION_AUTHTYPE_NONE,
    IPMI_SESSION_AUTHTYPE_OEM, IPMI_SESSION_AUTHTYPE_PASSWORD, IPMI_SESSION_PRIV_ADMIN,
    IPMI_SESSION_PRIV_CALLBACK, IPMI_SESSION_PRIV_OEM, IPMI_SESSION_PRIV_OPERATOR,
    IPMI_SESSION_PRIV_USER,
};

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum InterfaceType {
    #[clap(name = "bmc")]
    Bmc,
    #[clap(name = "open")]
    Open,
    #[clap(name = "serial-basic")]
    SerialBasic,
    #[clap(name = "serial-terminal")]
    SerialTerminal,
    #[clap(name = "lan")]
    Lan,
    #[clap(name = "lanplus")]
    Lanplus,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Bmc => "bmc",
            InterfaceType::Open => "open",
            InterfaceType::SerialBasic => "serial-basic",
            InterfaceType::SerialTerminal => "serial-terminal",
            InterfaceType::Lan => "lan",
            InterfaceType::Lanplus => "lanplus",
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, InterfaceType::Lan | InterfaceType::Lanplus)
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum PrivilegeLevel {
    Callback,
    User,
    Operator,
    Administrator,
    OEM,
}

impl PrivilegeLevel {
    pub fn to_u8(&self) -> u8 {
        match self {
            PrivilegeLevel::Callback => IPMI_SESSION_PRIV_CALLBACK,
            PrivilegeLevel::User => IPMI_SESSION_PRIV_USER,
            PrivilegeLevel::Operator => IPMI_SESSION_PRIV_OPERATOR,
            PrivilegeLevel::Administrator => IPMI_SESSION_PRIV_ADMIN,
            PrivilegeLevel::OEM => IPMI_SESSION_PRIV_OEM,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum AuthType {
    None,
    MD2,
    MD5,
    OEM,
    Password,
}

impl AuthType {
    pub fn to_u8(&self) -> u8 {
        match self {
            AuthType::None => IPMI_SESSION_AUTHTYPE_NONE,
            AuthType::MD2 => IPMI_SESSION_AUTHTYPE_MD2,
            AuthType::MD5 => IPMI_SESSION_AUTHTYPE_MD5,
            AuthType::OEM => IPMI_SESSION_AUTHTYPE_OEM,
            AuthType::Password => IPMI_SESSION_AUTHTYPE_PASSWORD,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ipmitool",
    version = "0.1.0",
    about = "IPMI management utility",
    max_term_width = 100,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: MainCommand,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    #[arg(short = 'h', long, action = ArgAction::Help)]
    pub help: Option<bool>,

    #[arg(short = 'V', long, action = ArgAction::Version)]
    pub version: Option<bool>,

    #[arg(short = 'v', action = ArgAction::Count, help = "Verbose (can use multiple times)")]
    pub verbose: u8,

    // Device interface selection
    #[arg(short = 'I', long, default_value = "bmc")]
    pub interface: InterfaceType,
    #[arg(short = 'd', default_value_t = 0)]
    pub devnum: u8,
    #[arg(
        short = 'D',
        long,
        help = "Serial device spec: device:baud[:S] (S marks a system interface)"
    )]
    pub devfile: Option<PathBuf>,

    // Network parameters
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,
    #[arg(short = 'p', long, default_value_t = 623)]
    pub port: u16,

    // Authentication
    #[arg(short = 'U', long)]
    pub username: Option<String>,
    #[arg(short = 'P', long)]
    pub password: Option<SecretString>,
    #[arg(short = 'f', long)]
    pub password_file: Option<PathBuf>,
    #[arg(
        short = 'E',
        help = "Read password from IPMI_PASSWORD environment variable"
    )]
    pub password_env: bool,

    #[arg(short = 'L', long, default_value = "administrator")]
    pub privilege: PrivilegeLevel,

    #[arg(short = 'A', long)]
    pub authtype: Option<AuthType>,

    // RMCP+ parameters
    #[arg(short = 'C', long, help = "Cipher suite ID for lanplus (0-3)")]
    pub cipher_suite: Option<u8>,
    #[arg(short = 'k', long, help = "BMC key (Kg) for RAKP key exchange")]
    pub kg_key: Option<SecretString>,
    #[arg(
        short = 'K',
        help = "Read BMC key from IPMI_KGKEY environment variable"
    )]
    pub kg_env: bool,

    #[arg(short = 'N', long, default_value_t = 0, help = "Timeout in seconds")]
    pub timeout: u32,
    #[arg(short = 'R', long, default_value_t = 0, help = "Number of retries")]
    pub retries: i32,

    // Bridging
    #[arg(short = 'b', long, default_value_t = 0)]
    pub target_channel: u8,
    #[arg(short = 't', long, default_value_t = 0, value_parser = parse_hex_u8)]
    pub target_addr: u8,
    #[arg(short = 'T', long, default_value_t = 0, value_parser = parse_hex_u8)]
    pub transit_addr: u8,
    #[arg(short = 'B', long, default_value_t = 0)]
    pub transit_channel: u8,
    #[arg(short = 'l', long, default_value_t = 0)]
    pub target_lun: u8,
    #[arg(short = 'm', long, default_value_t = 0, value_parser = parse_hex_u8)]
    pub arg_addr: u8,
}

/// Slave addresses on the command line are usually written as 0x-prefixed
/// hex; plain decimal works too.
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse::<u8>()
    };
    parsed.map_err(|e| format!("invalid address value '{}': {}", s, e))
}

#[derive(Subcommand, Debug)]
pub enum MainCommand {
    /// Send a raw request: raw <netfn> <cmd> [data..]
    Raw {
        #[arg(required = true, num_args = 2..)]
        args: Vec<String>,
    },

    /// Management controller commands
    Mc {
        #[command(subcommand)]
        subcmd: McCommand,
    },
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        let password_sources = [
            self.global.password.is_some(),
            self.global.password_file.is_some(),
            self.global.password_env,
        ];
        if password_sources.iter().filter(|&&x| x).count() > 1 {
            return Err("Only one password source (-P, -f, -E) may be given".into());
        }

        if self.global.kg_key.is_some() && self.global.kg_env {
            return Err("Only one Kg key source (-k, -K) may be given".into());
        }

        if self.global.interface.is_remote() && self.global.hostname.is_none() {
            return Err(format!(
                "Interface {} requires a hostname (-H)",
                self.global.interface.as_str()
            ));
        }

        match self.global.interface {
            InterfaceType::SerialBasic | InterfaceType::SerialTerminal => {
                if self.global.devfile.is_none() {
                    return Err(format!(
                        "Interface {} requires -D device:baud[:S]",
                        self.global.interface.as_str()
                    ));
                }
            }
            _ => {}
        }

        if let Some(id) = self.global.cipher_suite {
            if id > 3 {
                return Err(format!("Unsupported cipher suite ID {}", id));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_raw_command() {
        let cli = Cli::try_parse_from(["ipmitool", "raw", "0x06", "0x01"]).unwrap();
        match cli.command {
            MainCommand::Raw { ref args } => assert_eq!(*args, vec!["0x06", "0x01"]),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_bridged_lan_invocation() {
        let cli = Cli::try_parse_from([
            "ipmitool", "-I", "lan", "-H", "bmc.example", "-U", "admin", "-P", "secret", "-t",
            "0x72", "-b", "7", "-v", "-v", "mc", "info",
        ])
        .unwrap();
        assert_eq!(cli.global.target_addr, 0x72);
        assert_eq!(cli.global.target_channel, 7);
        assert_eq!(cli.global.verbose, 2);
        assert!(cli.validate().is_ok());
        assert!(matches!(cli.command, MainCommand::Mc { .. }));
    }

    #[test]
    fn test_validate_remote_requires_hostname() {
        let cli = Cli::try_parse_from(["ipmitool", "-I", "lanplus", "raw", "6", "1"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_two_password_sources() {
        let cli = Cli::try_parse_from([
            "ipmitool", "-I", "lan", "-H", "h", "-P", "x", "-E", "raw", "6", "1",
        ])
        .unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_parse_hex_addresses() {
        assert_eq!(parse_hex_u8("0x20").unwrap(), 0x20);
        assert_eq!(parse_hex_u8("32").unwrap(), 32);
        assert!(parse_hex_u8("0xzz").is_err());
    }
}
