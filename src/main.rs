use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use comment_cache::api::{Comment, ReactionRequest, ReactionType, WriteOutcome};
use comment_cache::offline::{SyncReport, SyncTrigger};
use comment_cache::transport::ApiRequest;
use comment_cache::{logging, App, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "comment-cache")]
#[command(about = "Offline-first client for a comment widget API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/comment-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// API origin, overriding the config file
  #[arg(long, global = true)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List comments on a topic
  List {
    /// Topic id (default: widget.topic_id)
    topic: Option<String>,
    /// Viewer whose reactions are included (default: widget.user_id)
    #[arg(short, long)]
    user: Option<String>,
  },
  /// List replies to a comment
  Replies {
    comment: String,
    #[arg(short, long)]
    user: Option<String>,
  },
  /// Post a comment, queueing it if the API is unreachable
  Post {
    topic: String,
    user: String,
    content: String,
    /// Reply to this comment
    #[arg(short, long)]
    parent: Option<String>,
  },
  /// Edit a comment
  Edit {
    comment: String,
    user: String,
    content: String,
  },
  /// Delete a comment
  Delete { comment: String, user: String },
  /// Toggle a like or dislike
  React {
    comment: String,
    user: String,
    kind: ReactionType,
  },
  /// Pin or unpin a comment
  Pin {
    comment: String,
    #[arg(long)]
    unpin: bool,
  },
  /// Route a GET through the strategy router
  Fetch { path: String },
  /// Prefetch the configured warm paths
  Warm,
  /// Show cache partition sizes
  Stats,
  /// Show writes waiting for the network
  Queue,
  /// Replay queued writes now
  Sync,
  /// Probe the API health endpoint
  Health,
  /// Probe connectivity and sync whenever the API comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let _log_guard = logging::init(&config.logging)?;

  let mut app = App::new(config)?;
  app.start_sweeper();

  let result = run(&app, args.command).await;
  app.shutdown().await;
  result
}

async fn run(app: &App, command: Command) -> Result<()> {
  let data = app.data();
  let widget = &app.config().widget;

  match command {
    Command::List { topic, user } => {
      let topic = topic
        .or_else(|| widget.topic_id.clone())
        .ok_or_else(|| eyre!("No topic given and widget.topic_id is not set"))?;
      let user = user.or_else(|| widget.user_id.clone());
      let comments = data.list_comments(&topic, user.as_deref()).await?;
      print_comments(&comments);
    }
    Command::Replies { comment, user } => {
      let user = user.or_else(|| widget.user_id.clone());
      let replies = data.list_replies(&comment, user.as_deref()).await?;
      print_comments(&replies);
    }
    Command::Post {
      topic,
      user,
      content,
      parent,
    } => {
      let outcome = data
        .create_comment(app.new_comment(&topic, &user, &content, parent))
        .await?;
      report_write(&outcome);
      print_comments(std::slice::from_ref(outcome.value()));
    }
    Command::Edit {
      comment,
      user,
      content,
    } => {
      let updated = data.update_comment(&comment, &user, &content).await?;
      print_comments(&[updated]);
    }
    Command::Delete { comment, user } => {
      data.delete_comment(&comment, &user).await?;
      println!("deleted {}", comment);
    }
    Command::React {
      comment,
      user,
      kind,
    } => {
      let outcome = data
        .react(ReactionRequest {
          comment_id: comment,
          user_id: user,
          reaction_type: kind,
        })
        .await?;
      report_write(&outcome);
    }
    Command::Pin { comment, unpin } => {
      let pinned = data.set_pinned(&comment, !unpin).await?;
      print_comments(&[pinned]);
    }
    Command::Fetch { path } => {
      let routed = app.router().fetch(ApiRequest::get(path)).await;
      let response = &routed.response;
      println!(
        "{} {} ({:?})",
        routed.strategy, response.status, response.source
      );
      println!("{}", response.text());
      if let Some(revalidation) = routed.revalidation {
        match revalidation.wait().await {
          Ok(fresh) => println!("revalidated: {}", fresh.status),
          Err(e) => println!("revalidation failed: {}", e),
        }
      }
    }
    Command::Warm => {
      let warmed = app.router().warm(&app.config().cache.warm_paths).await;
      println!("warmed {} paths", warmed);
    }
    Command::Stats => {
      for stats in app.router().stats() {
        println!("{:<8} {:>4}/{}", stats.name, stats.size, stats.max_size);
      }
    }
    Command::Queue => {
      let mut count = 0;
      for write in app.queue().list_pending()? {
        count += 1;
        println!(
          "{}  {:<16} {}  {}",
          write.id,
          write.kind.to_string(),
          write.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          write.payload
        );
      }
      if count == 0 {
        println!("no pending writes");
      }
    }
    Command::Sync => {
      let report = app.sync().trigger(SyncTrigger::FlushNow).await;
      print_report(&report);
    }
    Command::Health => {
      let health = data.health().await?;
      println!(
        "{} (round trip {} ms, server {} ms)",
        health.status,
        health.round_trip_ms,
        health
          .server_response_time_ms
          .map(|ms| ms.to_string())
          .unwrap_or_else(|| "-".to_string())
      );
    }
    Command::Watch => watch(app).await?,
  }

  Ok(())
}

async fn watch(app: &App) -> Result<()> {
  let mut worker = app.spawn_sync_worker();
  let probe = app.spawn_probe(worker.notifier());
  println!("watching, press Ctrl+C to stop");

  loop {
    tokio::select! {
      report = worker.next_report() => match report {
        Some(report) => print_report(&report),
        None => break,
      },
      signal = tokio::signal::ctrl_c() => {
        signal?;
        break;
      }
    }
  }

  probe.abort();
  worker.shutdown().await;
  Ok(())
}

fn print_comments(comments: &[Comment]) {
  if comments.is_empty() {
    println!("no comments");
    return;
  }
  for comment in comments {
    let author = comment.username.as_deref().unwrap_or(&comment.user_id);
    let pin = if comment.is_pinned { " [pinned]" } else { "" };
    let mine = comment
      .user_reaction
      .map(|r| format!(" (you: {})", r))
      .unwrap_or_default();
    println!(
      "{}  {}{}  +{} -{}  {} replies{}",
      comment.id, author, pin, comment.likes_count, comment.dislikes_count, comment.replies_count, mine
    );
    println!("    {}", comment.content);
  }
}

fn report_write<T>(outcome: &WriteOutcome<T>) {
  match outcome {
    WriteOutcome::Committed(_) => println!("saved"),
    WriteOutcome::Queued { pending_id, .. } => {
      println!("API unreachable, queued as {}", pending_id)
    }
    WriteOutcome::Coalesced { cancelled_id, .. } => {
      println!("cancelled queued toggle {}", cancelled_id)
    }
    WriteOutcome::Dropped { .. } => println!("API unreachable and the write could not be queued"),
  }
}

fn print_report(report: &SyncReport) {
  if report.skipped {
    println!("sync already running");
    return;
  }
  println!(
    "sync: {} confirmed, {} rejected, {} deferred",
    report.confirmed(),
    report.rejected(),
    report.deferred()
  );
}
