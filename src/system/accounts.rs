//! Account database client (getent / groupadd / useradd / usermod)

use anyhow::{Context, Result, bail};
use declarative::types::{Group, User};
use declarative::{AccountDatabase, GroupEntry, UserEntry};
use std::path::PathBuf;
use std::process::Command;

use crate::runner;

/// getent exits with 2 when the key is not in the database
const GETENT_NOT_FOUND: i32 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct Accounts;

impl Accounts {
    fn getent(database: &str, key: &str) -> Result<Option<String>> {
        let output = Command::new("getent")
            .args([database, key])
            .output()
            .with_context(|| format!("Failed to execute: getent {database} {key}"))?;

        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            Some(GETENT_NOT_FOUND) => Ok(None),
            _ => bail!(
                "getent {database} {key} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    fn group(key: &str) -> Result<Option<GroupEntry>> {
        Self::getent("group", key)?
            .map(|line| parse_group(&line))
            .transpose()
    }

    fn user(key: &str) -> Result<Option<UserEntry>> {
        Self::getent("passwd", key)?
            .map(|line| parse_passwd(&line))
            .transpose()
    }
}

impl AccountDatabase for Accounts {
    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>> {
        Self::group(name)
    }

    fn group_by_gid(&self, gid: u32) -> Result<Option<GroupEntry>> {
        Self::group(&gid.to_string())
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>> {
        Self::user(name)
    }

    fn user_by_uid(&self, uid: u32) -> Result<Option<UserEntry>> {
        Self::user(&uid.to_string())
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        runner::checked(Command::new("groupadd").args(groupadd_args(group)))?;
        Ok(())
    }

    fn create_user(&self, user: &User, gid: u32) -> Result<()> {
        runner::checked(Command::new("useradd").args(useradd_args(user, gid)))?;
        Ok(())
    }

    fn modify_user(&self, user: &User, gid: u32) -> Result<()> {
        runner::checked(Command::new("usermod").args(usermod_args(user, gid)))?;
        Ok(())
    }
}

/// Parse a `group` database line: `name:password:gid:members`
fn parse_group(line: &str) -> Result<GroupEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 3 {
        bail!("Malformed group entry: {line}");
    }
    Ok(GroupEntry {
        name: fields[0].to_string(),
        gid: fields[2]
            .parse()
            .with_context(|| format!("Invalid gid in group entry: {line}"))?,
    })
}

/// Parse a `passwd` database line: `name:password:uid:gid:gecos:home:shell`
fn parse_passwd(line: &str) -> Result<UserEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        bail!("Malformed passwd entry: {line}");
    }
    Ok(UserEntry {
        name: fields[0].to_string(),
        uid: fields[2]
            .parse()
            .with_context(|| format!("Invalid uid in passwd entry: {line}"))?,
        gid: fields[3]
            .parse()
            .with_context(|| format!("Invalid gid in passwd entry: {line}"))?,
        home: PathBuf::from(fields[5]),
        shell: fields[6].to_string(),
    })
}

fn groupadd_args(group: &Group) -> Vec<String> {
    let mut args = vec!["--gid".to_string(), group.gid.to_string()];
    if group.system {
        args.push("--system".to_string());
    }
    args.push(group.name.clone());
    args
}

fn useradd_args(user: &User, gid: u32) -> Vec<String> {
    let mut args = vec![
        "--uid".to_string(),
        user.uid.to_string(),
        "--gid".to_string(),
        gid.to_string(),
    ];
    if user.system {
        args.push("--system".to_string());
    }
    args.push(if user.create_home {
        "--create-home".to_string()
    } else {
        "--no-create-home".to_string()
    });
    if let Some(home) = &user.home {
        args.push("--home-dir".to_string());
        args.push(home.display().to_string());
    }
    if let Some(shell) = &user.shell {
        args.push("--shell".to_string());
        args.push(shell.clone());
    }
    args.push(user.name.clone());
    args
}

fn usermod_args(user: &User, gid: u32) -> Vec<String> {
    let mut args = vec!["--gid".to_string(), gid.to_string()];
    if let Some(home) = &user.home {
        args.push("--home".to_string());
        args.push(home.display().to_string());
    }
    if let Some(shell) = &user.shell {
        args.push("--shell".to_string());
        args.push(shell.clone());
    }
    args.push(user.name.clone());
    args
}
