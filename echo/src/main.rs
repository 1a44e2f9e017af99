// Copyright 2018-2025 the Deno authors. MIT license.

use anyhow::Context;
use clap::ArgMatches;
use clap::builder::Arg;
use clap::builder::ArgAction;
use clap::builder::Command;
use deno_uv_stream::AnyError;
use deno_uv_stream::Callback;
use deno_uv_stream::ContextOptions;
use deno_uv_stream::DEFAULT_BACKLOG;
use deno_uv_stream::EventKind;
use deno_uv_stream::ScriptContext;
use deno_uv_stream::ScriptValue;
use deno_uv_stream::StreamError;
use deno_uv_stream::TcpHandle;
use deno_uv_stream::UvLoop;
use deno_uv_stream::UvTcp;
use std::cell::Cell;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::rc::Rc;

struct Config {
  addr: SocketAddr,
  backlog: u32,
  nodelay: bool,
  max_connections: Option<usize>,
}

fn main() -> Result<(), AnyError> {
  env_logger::Builder::from_env(
    env_logger::Env::default().default_filter_or("info"),
  )
  .init();

  let mut matches = build_cli().get_matches();
  let config = parse_config(&mut matches);

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?;
  // Sockets register with the reactor of the runtime entered here.
  let _guard = runtime.enter();

  let context = ScriptContext::new(ContextOptions {
    default_backlog: config.backlog,
    uncaught_error_handler: Some(Rc::new(|err: &StreamError| {
      log::error!("uncaught: {err}");
    })),
    ..Default::default()
  });
  let uv_loop = UvLoop::new();
  let server = serve(&context, &uv_loop, &config)?;
  let local_addr = server
    .with_native(|tcp| tcp.local_addr())
    .context("Unable to read the listening address")?;
  log::info!("echoing on {local_addr}");

  runtime.block_on(uv_loop.run_async());
  drop(server);

  println!("{}", serde_json::to_string_pretty(&context.stats())?);
  Ok(())
}

fn build_cli() -> Command {
  Command::new("uv_echo")
    .about("Echoes every byte received back to its sender")
    .arg(
      Arg::new("addr")
        .long("addr")
        .value_name("IP")
        .help("Address to listen on")
        .default_value("127.0.0.1")
        .value_parser(clap::value_parser!(IpAddr)),
    )
    .arg(
      Arg::new("port")
        .long("port")
        .short('p')
        .help("Port to listen on, 0 picks a free one")
        .default_value("7000")
        .value_parser(clap::value_parser!(u16)),
    )
    .arg(
      Arg::new("backlog")
        .long("backlog")
        .help("Length of the pending connection queue")
        .default_value("128")
        .value_parser(clap::value_parser!(u32)),
    )
    .arg(
      Arg::new("nodelay")
        .long("nodelay")
        .help("Disable Nagle's algorithm on accepted connections")
        .action(ArgAction::SetTrue),
    )
    .arg(
      Arg::new("max-connections")
        .long("max-connections")
        .value_name("N")
        .help("Stop listening after serving N connections")
        .value_parser(clap::value_parser!(usize)),
    )
}

fn parse_config(matches: &mut ArgMatches) -> Config {
  let ip = matches
    .remove_one::<IpAddr>("addr")
    .unwrap_or(IpAddr::from([127, 0, 0, 1]));
  let port = matches.remove_one::<u16>("port").unwrap_or(7000);
  Config {
    addr: SocketAddr::new(ip, port),
    backlog: matches
      .remove_one::<u32>("backlog")
      .unwrap_or(DEFAULT_BACKLOG),
    nodelay: matches.get_flag("nodelay"),
    max_connections: matches.remove_one::<usize>("max-connections"),
  }
}

fn serve(
  context: &Rc<ScriptContext>,
  uv_loop: &UvLoop,
  config: &Config,
) -> Result<TcpHandle, StreamError> {
  let server = TcpHandle::new(context, UvTcp::new(uv_loop));
  server
    .with_native(|tcp| tcp.bind(config.addr))
    .map_err(|error| StreamError::Issue { op: "bind", error })?;

  let served = Rc::new(Cell::new(0usize));
  let on_connection = {
    let weak = server.downgrade();
    let context = context.clone();
    let uv_loop = uv_loop.clone();
    let nodelay = config.nodelay;
    let max_connections = config.max_connections;
    move |_: &[ScriptValue]| -> Result<(), AnyError> {
      let Some(server) = weak.upgrade() else {
        return Ok(());
      };
      let client = TcpHandle::new(&context, UvTcp::new(&uv_loop));
      server.accept(&client)?;
      client.with_native(|tcp| tcp.nodelay(nodelay))?;
      if let Ok(peer) = client.with_native(|tcp| tcp.peer_addr()) {
        log::info!("connection from {peer}");
      }
      echo(&client)?;

      served.set(served.get() + 1);
      if max_connections.is_some_and(|max| served.get() >= max) {
        log::info!("served {} connection(s), closing listener", served.get());
        server.close(None)?;
      }
      Ok(())
    }
  };
  server.listen(on_connection, None)?;
  Ok(server)
}

/// Writes every chunk back to `client`. Once the peer is done sending, the
/// write side is shut down and the handle closed.
fn echo(client: &TcpHandle) -> Result<(), StreamError> {
  let weak = client.downgrade();
  client.on(EventKind::Data, move |args| {
    let (Some(client), Some(chunk)) = (weak.upgrade(), args[0].as_buffer())
    else {
      return Ok(());
    };
    client.write(chunk.clone(), None)?;
    Ok(())
  });

  let weak = client.downgrade();
  client.on(EventKind::End, move |_| {
    let Some(client) = weak.upgrade() else {
      return Ok(());
    };
    client.shutdown(Some(close_after(&client)))?;
    Ok(())
  });

  let weak = client.downgrade();
  client.on(EventKind::Error, move |args| {
    log::warn!("connection error: {}", args[0]);
    if let Some(client) = weak.upgrade() {
      client.close(None)?;
    }
    Ok(())
  });

  client.read_start()
}

fn close_after(client: &TcpHandle) -> Callback {
  let weak = client.downgrade();
  Box::new(move |args: &[ScriptValue]| -> Result<(), AnyError> {
    if let Some(error) = args.first() {
      log::debug!("shutdown failed: {error}");
    }
    if let Some(client) = weak.upgrade() {
      client.close(None)?;
    }
    Ok(())
  })
}
