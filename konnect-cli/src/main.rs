//! konnect: a line-mode IRC client on top of konnect-sdk.
//!
//! Reads commands from stdin and prints session events to stdout. Plain
//! text goes to the current window (the last channel joined, or whatever
//! `/window` selected).

mod config;
mod input;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use konnect_sdk::event::ChatLine;
use konnect_sdk::irc::{is_channel_name, normalize_channel};
use konnect_sdk::{Client, DEFAULT_QUIT_MESSAGE, Event, LineKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Resolved};
use crate::input::Action;

#[derive(Parser, Debug)]
#[command(name = "konnect", about = "Line-mode IRC client")]
pub struct Cli {
    /// IRC server host (host or host:port)
    #[arg(long)]
    server: Option<String>,

    /// IRC server port (plain text)
    #[arg(long)]
    port: Option<u16>,

    /// Nickname
    #[arg(long)]
    nick: Option<String>,

    /// Real name
    #[arg(long)]
    realname: Option<String>,

    /// Server password
    #[arg(long, env = "KONNECT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Channel to join after registration
    #[arg(long)]
    join: Option<String>,

    /// Config file (default: <config dir>/konnect/cli.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() -> Result<()> {
    // JSON logs with KONNECT_LOG_JSON=1, human-readable otherwise. Logs go to
    // stderr so they don't interleave with chat output.
    let json_logs = std::env::var("KONNECT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("konnect_cli=info,konnect_sdk=info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

/// Which window plain text goes to.
#[derive(Default)]
struct Ui {
    window: Option<String>,
    quitting: bool,
}

impl Ui {
    fn print_line(&self, line: &ChatLine) {
        let time = line.timestamp.with_timezone(&chrono::Local).format("%H:%M");
        let text = match line.kind {
            LineKind::Message => format!("<{}> {}", line.sender, line.text),
            LineKind::Action => format!("* {} {}", line.sender, line.text),
            LineKind::Notice => format!("-{}- {}", line.sender, line.text),
            LineKind::System => line.text.clone(),
        };
        println!("{time} [{}] {text}", line.channel);
    }

    /// Returns `false` once the session is over.
    fn on_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::Connected => tracing::info!("connected, registering"),
            Event::Welcome { nick } => println!("-- registered as {nick}"),
            Event::Line(line) => self.print_line(&line),
            Event::ChannelOpened { channel } => {
                if is_channel_name(&channel) || self.window.is_none() {
                    self.window = Some(channel.clone());
                }
                println!("-- window opened: {channel}");
            }
            Event::ChannelClosed { channel } => {
                if self
                    .window
                    .as_deref()
                    .is_some_and(|w| w.eq_ignore_ascii_case(&channel))
                {
                    self.window = None;
                }
                println!("-- window closed: {channel}");
            }
            Event::ChannelRenamed { old, new } => {
                if self
                    .window
                    .as_deref()
                    .is_some_and(|w| w.eq_ignore_ascii_case(&old))
                {
                    self.window = Some(new.clone());
                }
            }
            Event::TopicChanged { .. }
            | Event::ModeChanged { .. }
            | Event::MembersChanged { .. }
            | Event::NickChanged { .. }
            | Event::AwayChanged { .. }
            | Event::ChannelFound(_)
            | Event::FavoriteChanged { .. } => {}
            Event::SelfAwayChanged { away } => {
                println!("-- {}", if away { "you are away" } else { "you are back" });
            }
            Event::OperatorGranted => println!("-- you are now an IRC operator"),
            Event::DirectoryUpdated { entries } => {
                println!("-- {entries} channels listed; /channels [search] to browse");
            }
            Event::WhoisReceived(info) => {
                println!("-- {} ({}@{}): {}", info.nick, info.username, info.hostname, info.realname);
                if !info.server.is_empty() {
                    println!("   server: {} {}", info.server, info.server_info);
                }
                if !info.connecting_from.is_empty() {
                    println!("   connecting from: {}", info.connecting_from);
                }
                if !info.channels.is_empty() {
                    println!("   channels: {}", info.channels.join(" "));
                }
                if info.is_operator {
                    println!("   is an IRC operator");
                }
                if let Some(idle) = info.idle_seconds {
                    println!("   idle: {idle}s");
                }
                if let Some(signon) = info.signon {
                    println!("   signed on: {}", signon.with_timezone(&chrono::Local));
                }
                if info.is_away {
                    println!("   away: {}", info.away_message);
                }
            }
            Event::Error { message } => {
                if message.starts_with("Connection failed") {
                    bail!(message);
                }
                eprintln!("!! {message}");
            }
            Event::Disconnected { reason } => {
                if !self.quitting {
                    println!("-- disconnected: {reason}");
                }
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Run one typed line. Returns `false` when the user asked to quit.
async fn run_action(client: &Client, ui: &mut Ui, action: Action) -> Result<bool> {
    let window = ui.window.clone();
    let need_window = || {
        if window.is_none() {
            println!("-- no window selected; /join a channel or /window <name>");
        }
        window.clone()
    };
    match action {
        Action::Say(text) => {
            if let Some(target) = need_window() {
                client.privmsg(&target, &text).await?;
            }
        }
        Action::Me(text) => {
            if let Some(target) = need_window() {
                client.action(&target, &text).await?;
            }
        }
        Action::Msg { target, text } => client.privmsg(&target, &text).await?,
        Action::Notice { target, text } => client.notice(&target, &text).await?,
        Action::Join(channel) => client.join(&channel).await?,
        Action::Part { channel, message } => {
            let channel = channel.or_else(|| window.clone().filter(|w| is_channel_name(w)));
            match channel {
                Some(channel) => client.part(&channel, message.as_deref()).await?,
                None => println!("-- not in a channel window"),
            }
        }
        Action::Quit(message) => {
            ui.quitting = true;
            if client.is_connected() {
                client
                    .disconnect(Some(message.as_deref().unwrap_or(DEFAULT_QUIT_MESSAGE)))
                    .await?;
                return Ok(true);
            }
            return Ok(false);
        }
        Action::Nick(nick) => client.change_nick(&nick).await?,
        Action::Topic(topic) => {
            if let Some(target) = need_window() {
                client.change_topic(&target, &topic).await?;
            }
        }
        Action::Whois(nick) => client.whois(&nick).await?,
        Action::List => client.refresh_channel_list().await?,
        Action::Channels(search) => {
            let view = client.directory_view(&search);
            for entry in view.favorites.iter().chain(view.others.iter()) {
                let star = if entry.favorite { "*" } else { " " };
                println!("{star} {:<24} {:>5}  {}", entry.name, entry.user_count, entry.topic);
            }
        }
        Action::Away(message) => client.set_away(message.as_deref()).await?,
        Action::Fav(channel) => {
            if let Some(channel) = channel.or_else(need_window) {
                let channel = normalize_channel(&channel);
                let on = client.toggle_favorite(&channel).await?;
                println!("-- {channel} {}", if on { "added to favorites" } else { "removed from favorites" });
            }
        }
        Action::Window(name) => {
            println!("-- window: {name}");
            ui.window = Some(name);
        }
        Action::Close(name) => {
            if let Some(name) = name.or_else(need_window) {
                client.close_query(&name).await?;
            }
        }
        Action::Rank { nick, rank, on } => {
            if let Some(channel) = need_window() {
                client.set_rank(&channel, &nick, rank, on).await?;
            }
        }
        Action::Kick { nick, reason } => {
            if let Some(channel) = need_window() {
                client.kick(&channel, &nick, reason.as_deref()).await?;
            }
        }
        Action::Ban { nick, reason } => {
            if let Some(channel) = need_window() {
                client.ban(&channel, &nick, reason.as_deref()).await?;
            }
        }
        Action::Kill { nick, reason } => client.kill(&nick, &reason).await?,
        Action::Mode { target, modes, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            client.mode(&target, &modes, &args).await?;
        }
        Action::Names => {
            if let Some(target) = need_window() {
                let snapshot = client.snapshot().await?;
                let channel = snapshot
                    .channels
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&target));
                match channel {
                    Some(channel) => {
                        for (rank, members) in channel.rank_groups() {
                            let names: Vec<String> =
                                members.iter().map(|m| m.display_name()).collect();
                            println!("{:<10} {}", rank.label(), names.join(" "));
                        }
                    }
                    None => println!("-- {target} is not open"),
                }
            }
        }
        Action::Help => println!("{}", input::HELP),
        Action::Raw(line) => client.send_raw(&line).await?,
        Action::Usage(usage) => println!("-- usage: {usage}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let file = Config::load(cli.config.as_deref());
    let resolved = Resolved::merge(&cli, &file);

    tracing::info!(
        server = %resolved.server,
        port = resolved.port,
        nick = %resolved.nick,
        "Starting konnect"
    );

    let (client, mut events) = Client::new(resolved.client_config());
    client.connect(&resolved.server, resolved.port).await?;

    let mut ui = Ui::default();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("Event channel closed, exiting");
                    break;
                };
                if !ui.on_event(event)? {
                    break;
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let Some(action) = input::parse(&line) else {
                            continue;
                        };
                        if !run_action(&client, &mut ui, action).await? {
                            break;
                        }
                    }
                    None => {
                        stdin_open = false;
                        ui.quitting = true;
                        if !client.is_connected() {
                            break;
                        }
                        client.disconnect(Some(DEFAULT_QUIT_MESSAGE)).await?;
                    }
                }
            }
        }
    }

    Ok(())
}
