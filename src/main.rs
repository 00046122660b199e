//! Veilstar Brawl Server
//!
//! `veilstar-brawl-server serve` runs the WebSocket gateway configured from
//! the environment. With no arguments it plays a scripted best-of-3 match
//! through the full commit-reveal path in memory.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use veilstar_brawl::{
    config::ProtocolConfig,
    core::field::hash_to_field,
    game::{
        moves::{Move, MovePlan},
        state::MatchFormat,
        surge::SurgeCard,
    },
    network::server::{GameServer, ServerConfig},
    proof::{
        commitment::CommitmentOpening,
        oracle::{OracleBackend, StubOracle},
        plan::{PlanPayload, SealedPlan},
        public_inputs::PublicInputs,
    },
    round::{
        anchor::{AnchorQueue, LogAnchor, DEFAULT_ANCHOR_QUEUE},
        events::EventBus,
        machine::{CommitRequest, RevealRequest, RoundResponse, RoundService},
        store::MemoryStore,
    },
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Veilstar Brawl Server v{}", VERSION);

    match std::env::args().nth(1).as_deref() {
        Some("serve") => serve().await,
        Some(other) => anyhow::bail!("unknown command {:?} (expected `serve` or nothing)", other),
        None => demo_match().await,
    }
}

/// Run the gateway until Ctrl-C.
async fn serve() -> anyhow::Result<()> {
    let config = ProtocolConfig::from_env().context("loading configuration")?;
    info!(
        "Mode: {:?}, reveal verification: {:?}, lock stale after {}s, move timeout {}s",
        config.mode, config.reveal_verify, config.lock_stale_secs, config.move_timeout_secs
    );

    let oracle = OracleBackend::select(config.verification_disabled, config.groth16_vk_path.as_deref())
        .context("selecting proof backend")?;
    let anchor = if config.anchor_enabled {
        let (queue, _worker) = AnchorQueue::spawn(LogAnchor, DEFAULT_ANCHOR_QUEUE, config.anchor_retry);
        queue
    } else {
        AnchorQueue::disabled()
    };

    let bus = EventBus::default();
    let server_config = ServerConfig::from_protocol(&config);
    let service = RoundService::new(Arc::new(MemoryStore::new()), oracle, Arc::new(bus.clone()), anchor, config)
        .context("starting round service")?;
    let server = GameServer::new(server_config, Arc::new(service), bus);

    tokio::select! {
        result = server.run() => result.context("game server")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

/// Scripted player: plan and surge per round.
struct Player {
    address: &'static str,
    plans: [MovePlan; 3],
    surge: [Option<SurgeCard>; 3],
}

impl Player {
    fn commit(&self, match_id: &str, round: u32, turn: u32) -> anyhow::Result<CommitRequest> {
        let (plan, surge) = self.pick(round);
        let nonce = hash_to_field(format!("{}:{}:{}", match_id, self.address, round).as_bytes());
        let commitment = CommitmentOpening {
            match_id: match_id.to_string(),
            round,
            turn,
            player: self.address.to_string(),
            surge,
            nonce,
            plan,
        }
        .commit()?;
        Ok(CommitRequest {
            match_id: match_id.to_string(),
            address: self.address.to_string(),
            round,
            turn,
            commitment,
            proof: "0x01".into(),
            public_inputs: PublicInputs::for_context(commitment, match_id, self.address, round, turn),
            transcript_hash: nonce,
            encrypted_plan: SealedPlan::seal(&PlanPayload::new(plan, surge, turn))?,
        })
    }

    fn reveal(&self, commit: &CommitRequest) -> RevealRequest {
        let (plan, surge) = self.pick(commit.round);
        RevealRequest {
            match_id: commit.match_id.clone(),
            address: commit.address.clone(),
            round: commit.round,
            turn: commit.turn,
            current_move: plan.at_turn(commit.turn).unwrap_or(Move::Stunned),
            move_plan: plan.moves().to_vec(),
            surge_card_id: surge,
            proof: commit.proof.clone(),
            public_inputs: Some(commit.public_inputs.clone()),
            transcript_hash: commit.transcript_hash,
            expected_winner: None,
        }
    }

    fn pick(&self, round: u32) -> (MovePlan, Option<SurgeCard>) {
        let index = (round.saturating_sub(1) as usize).min(self.plans.len() - 1);
        (self.plans[index], self.surge[index])
    }
}

/// Demo function to exercise the protocol end to end.
async fn demo_match() -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let bus = EventBus::default();
    let (anchor, anchor_worker) = AnchorQueue::spawn(LogAnchor, DEFAULT_ANCHOR_QUEUE, Default::default());
    let service = RoundService::new(
        Arc::new(MemoryStore::new()),
        StubOracle,
        Arc::new(bus.clone()),
        anchor,
        ProtocolConfig::default(),
    )?;

    let p1 = Player {
        address: "GDEMOPLAYERONE",
        plans: [
            MovePlan::from_names(&["kick", "kick", "block", "special", "punch", "kick", "block", "kick", "punch", "special"])?,
            MovePlan::repeat(Move::Block),
            MovePlan::repeat(Move::Kick),
        ],
        surge: [Some(SurgeCard::Fury), None, Some(SurgeCard::TwinStrike)],
    };
    let p2 = Player {
        address: "GDEMOPLAYERTWO",
        plans: [
            MovePlan::from_names(&["punch", "block", "block", "punch", "special", "block", "kick", "punch", "block", "kick"])?,
            MovePlan::repeat(Move::Kick),
            MovePlan::repeat(Move::Punch),
        ],
        surge: [Some(SurgeCard::Bulwark), Some(SurgeCard::Breaker), None],
    };

    let match_id = "demo-match";
    let now = Utc::now();
    service
        .create_match(match_id, p1.address, p2.address, MatchFormat::BestOf3, now)
        .await?;
    service.start_match(match_id, now).await?;

    for round in 1..=3 {
        let c1 = p1.commit(match_id, round, 1)?;
        let c2 = p2.commit(match_id, round, 1)?;
        info!("Round {}: commitments {} / {}", round, c1.commitment, c2.commitment);
        service.commit(c1.clone(), now).await?;
        service.commit(c2.clone(), now).await?;
        service.reveal(p1.reveal(&c1), now).await?;

        let RoundResponse::Resolution(resolution) = service.reveal(p2.reveal(&c2), now).await? else {
            anyhow::bail!("round {} did not resolve", round);
        };
        for turn in &resolution.turns {
            info!("  turn {:>2}: {}", turn.turn, turn.outcome.narrative);
        }
        info!(
            "Round {} {:?}: winner {:?}, score {:?}, digest {}",
            round, resolution.ending, resolution.winner_address, resolution.rounds_won, resolution.digest
        );

        if resolution.match_over {
            info!("=== Match Results ===");
            info!("Winner: {:?}", resolution.match_winner);
            break;
        }
    }

    drop(service);
    anchor_worker.await?;
    Ok(())
}
