//! Integration coverage for the full game-flow orchestrator: main-line
//! progression, the jackpot branch decision, validation rejections,
//! cancellation, timer-driven auto-advance, and subscriber backpressure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use drawhall::errors::OrchestratorError;
use drawhall::events::EventSpine;
use drawhall::manager::GameManager;
use drawhall::repository::CompositeRepository;
use drawhall::stage::Stage;

const ROOM: &str = "SG01";

fn build_manager(stage_durations: HashMap<Stage, Duration>) -> (tempfile::TempDir, Arc<GameManager>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = CompositeRepository::open_at_path(dir.path(), "test").unwrap();
    let manager = GameManager::new(
        repo,
        EventSpine::new(),
        vec![ROOM.to_string()],
        ROOM.to_string(),
        75,
        stage_durations,
    );
    (dir, manager)
}

/// Drive from `Preparation` to `DrawingStart` via manual advances — every
/// intermediate stage in that span is time- or signal-gated, not
/// ball-triggered.
async fn advance_to_drawing_start(manager: &GameManager) {
    for _ in 0..4 {
        manager.advance_stage(ROOM, false).await.unwrap();
    }
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::DrawingStart);
}

/// Draw `numbers` as regular balls, flagging the last one, then give the
/// spawned auto-advance task time to run.
async fn draw_regulars_and_settle(manager: &GameManager, numbers: &[u8]) {
    let last_index = numbers.len() - 1;
    for (i, &n) in numbers.iter().enumerate() {
        manager.update_regular_balls(ROOM, n, i == last_index).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// From `DrawingClose`, drive manually through the extra-ball leg up to and
/// including resolving `PayoutSettlement`'s branch decision. Extra balls are
/// drawn distinct from `used_numbers`.
async fn run_extra_ball_leg_through_payout_branch(manager: &GameManager, used_numbers: &[u8]) -> Stage {
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::DrawingClose);
    manager.advance_stage(ROOM, false).await.unwrap(); // -> ExtraBallPrepare
    manager.advance_stage(ROOM, false).await.unwrap(); // -> ExtraBallSideSelectBettingStart (picks side)
    manager.advance_stage(ROOM, false).await.unwrap(); // -> ExtraBallSideSelectBettingClosed
    manager.advance_stage(ROOM, false).await.unwrap(); // -> ExtraBallDrawingStart

    let game = manager.get_current_game(ROOM).await.unwrap().unwrap();
    assert_eq!(game.stage, Stage::ExtraBallDrawingStart);
    let extra_count = game.extra_ball_count as usize;

    let candidates: Vec<u8> = (1..=75u8).filter(|n| !used_numbers.contains(n)).take(extra_count).collect();
    let last_index = candidates.len() - 1;
    for (i, &n) in candidates.iter().enumerate() {
        manager.update_extra_balls(ROOM, n, i == last_index).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::ExtraBallDrawingClose);

    manager.advance_stage(ROOM, false).await.unwrap(); // -> PayoutSettlement
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::PayoutSettlement);
    manager.advance_stage(ROOM, false).await.unwrap(); // resolve branch
    manager.get_current_stage(ROOM).await.unwrap()
}

/// Drive the lucky-ball leg (from `LuckyPreparation`) to `GameOver`, drawing
/// `lucky_numbers` (exactly 7, last one flagged).
async fn run_lucky_leg_to_game_over(manager: &GameManager, lucky_numbers: &[u8]) {
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::LuckyPreparation);
    manager.advance_stage(ROOM, false).await.unwrap(); // -> DrawingLuckyBallsStart
    let last_index = lucky_numbers.len() - 1;
    for (i, &n) in lucky_numbers.iter().enumerate() {
        manager.handle_draw_lucky_ball(ROOM, n, i == last_index).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::DrawingLuckyBallsClosed);
    manager.advance_stage(ROOM, false).await.unwrap(); // -> GameOver
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::GameOver);
}

/// Drive the jackpot leg (from `JackpotPreparation`) to `LuckyPreparation`,
/// drawing `jackpot_numbers` (last one flagged).
async fn run_jackpot_leg_to_lucky_preparation(manager: &GameManager, jackpot_numbers: &[u8]) {
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::JackpotPreparation);
    manager.advance_stage(ROOM, false).await.unwrap(); // -> JackpotDrawingStart
    let last_index = jackpot_numbers.len() - 1;
    for (i, &n) in jackpot_numbers.iter().enumerate() {
        manager.handle_draw_jackpot_ball(ROOM, n, i == last_index).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_current_stage(ROOM).await.unwrap(), Stage::JackpotDrawingClosed);
    manager.advance_stage(ROOM, false).await.unwrap(); // -> JackpotSettlement
    manager.advance_stage(ROOM, false).await.unwrap(); // -> LuckyPreparation
}

#[tokio::test]
async fn s1_happy_main_line_reaches_game_over_and_reseeds_with_a_new_game_id() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();

    let g1 = manager.get_current_game(ROOM).await.unwrap().unwrap().game_id;
    assert!(manager.create_new_game(ROOM).await.is_err(), "a game is already active");

    advance_to_drawing_start(&manager).await;
    let regulars: Vec<u8> = (1..=30u8).collect();
    draw_regulars_and_settle(&manager, &regulars).await;

    let branch_stage = run_extra_ball_leg_through_payout_branch(&manager, &regulars).await;
    assert!(matches!(branch_stage, Stage::JackpotPreparation | Stage::LuckyPreparation));

    if branch_stage == Stage::JackpotPreparation {
        run_jackpot_leg_to_lucky_preparation(&manager, &[40, 41, 42, 43, 44, 45, 46]).await;
    }
    run_lucky_leg_to_game_over(&manager, &[50, 51, 52, 53, 54, 55, 56]).await;

    manager.advance_stage(ROOM, false).await.unwrap(); // finalize -> Preparation, fresh game

    let fresh = manager.get_current_game(ROOM).await.unwrap().unwrap();
    assert_eq!(fresh.stage, Stage::Preparation);
    assert_ne!(fresh.game_id, g1);

    let history = manager.get_recent_game_histories(ROOM, 10).unwrap();
    let g1_row = history.iter().find(|row| row.game_id == g1).expect("G1 must be archived");
    assert_eq!(g1_row.stage, Stage::GameOver);
    assert!(g1_row.ended_at.is_some());
}

#[tokio::test]
async fn s2_full_lucky_match_forces_jackpot_branch_without_flag() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();
    manager.set_has_jackpot(ROOM, false).await.unwrap();
    assert!(!manager.get_current_game(ROOM).await.unwrap().unwrap().has_jackpot);

    let lucky_numbers = manager.get_lucky_balls(ROOM).unwrap();
    assert_eq!(lucky_numbers.len(), 7);

    advance_to_drawing_start(&manager).await;
    // Draw exactly the room's lucky numbers as the regular pool so the
    // lucky subset is fully contained in the drawn set.
    draw_regulars_and_settle(&manager, &lucky_numbers).await;

    let branch_stage = run_extra_ball_leg_through_payout_branch(&manager, &lucky_numbers).await;
    assert_eq!(
        branch_stage,
        Stage::JackpotPreparation,
        "full lucky match must route to the jackpot branch even with has_jackpot=false"
    );

    manager.advance_stage(ROOM, false).await.unwrap(); // -> JackpotDrawingStart
    let game = manager.get_current_game(ROOM).await.unwrap().unwrap();
    let jackpot = game.jackpot.expect("jackpot sub-game must be lazily initialized on entry");
    assert_eq!(jackpot.lucky_balls, lucky_numbers);
}

#[tokio::test]
async fn s3_duplicate_ball_rejected_and_game_unchanged() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();
    advance_to_drawing_start(&manager).await;

    manager.update_regular_balls(ROOM, 10, false).await.unwrap();
    let err = manager.update_regular_balls(ROOM, 10, false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateBall { number: 10 }));

    let game = manager.get_current_game(ROOM).await.unwrap().unwrap();
    assert_eq!(game.regular_balls.len(), 1);
}

#[tokio::test]
async fn s4_cancel_rejected_at_non_cancellable_stage() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();

    advance_to_drawing_start(&manager).await;
    draw_regulars_and_settle(&manager, &[1]).await;

    let branch_stage = run_extra_ball_leg_through_payout_branch(&manager, &[1]).await;
    if branch_stage == Stage::JackpotPreparation {
        run_jackpot_leg_to_lucky_preparation(&manager, &[10, 11, 12, 13, 14, 15, 16]).await;
    }
    run_lucky_leg_to_game_over(&manager, &[20, 21, 22, 23, 24, 25, 26]).await;

    // game-over is also non-cancellable; verify the rejection and that the
    // game is left untouched rather than silently cancelled.
    let err = manager.cancel_game(ROOM, "too late").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CannotCancelGame { .. }));
    let game = manager.get_current_game(ROOM).await.unwrap().unwrap();
    assert_eq!(game.stage, Stage::GameOver);
}

#[tokio::test]
async fn s5_timer_auto_advances_through_a_short_override_stage() {
    let mut overrides = HashMap::new();
    overrides.insert(Stage::CardPurchaseClose, Duration::from_millis(30));
    let (_dir, manager) = build_manager(overrides);
    manager.start().await.unwrap();

    manager.advance_stage(ROOM, false).await.unwrap(); // -> NewRound
    manager.advance_stage(ROOM, false).await.unwrap(); // -> CardPurchaseOpen
    manager.advance_stage(ROOM, false).await.unwrap(); // -> CardPurchaseClose

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        manager.get_current_stage(ROOM).await.unwrap(),
        Stage::DrawingStart,
        "the armed timer must auto-advance CardPurchaseClose without further manual input"
    );
}

#[tokio::test]
async fn s6_slow_subscriber_drops_excess_events_without_being_removed() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();
    let _rx = manager.subscribe("s1").await; // never drained, capacity 100

    advance_to_drawing_start(&manager).await;
    for n in 1..=75u8 {
        manager.update_regular_balls(ROOM, n, n == 75).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.unsubscribe("s1").await;
}

#[tokio::test]
async fn universal_invariant_regular_pool_never_exceeds_75() {
    let (_dir, manager) = build_manager(HashMap::new());
    manager.start().await.unwrap();
    advance_to_drawing_start(&manager).await;

    for n in 1..=75u8 {
        manager.update_regular_balls(ROOM, n, n == 75).await.unwrap();
    }
    let game = manager.get_current_game(ROOM).await.unwrap().unwrap();
    assert_eq!(game.regular_balls.len(), 75);

    tokio::time::sleep(Duration::from_millis(50)).await;
    // The pool's terminal last-flag auto-advances past DrawingStart, so a
    // further regular-ball draw must now be rejected for the wrong stage.
    let err = manager.update_regular_balls(ROOM, 1, false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidStage { .. }));
}
