//! End-to-end command loop scenarios against scripted doubles.

use std::sync::Arc;

use webpilot::config::PilotConfig;
use webpilot::driver::marionette::KEY_RETURN;
use webpilot::driver::{BrowserDriver, ElementRef};
use webpilot::locator::TextLocator;
use webpilot::oracle::{ActionKind, DecisionOracle, ProposedAction};
use webpilot::orchestrator::Orchestrator;
use webpilot::testing::{FixedLocator, MockDriver, ScriptedOracle};

fn fast_config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.timing.page_load_timeout_ms = 100;
    config.timing.ready_poll_interval_ms = 1;
    config.timing.scroll_settle_ms = 0;
    config.timing.focus_settle_ms = 0;
    config.timing.step_settle_ms = 0;
    config.timing.recovery_settle_ms = 0;
    config.timing.search_settle_ms = 0;
    config
}

fn orchestrator(
    driver: Arc<MockDriver>,
    oracle: ScriptedOracle,
    locator: Arc<dyn TextLocator>,
) -> Orchestrator {
    Orchestrator::new(
        driver as Arc<dyn BrowserDriver>,
        Arc::new(oracle) as Arc<dyn DecisionOracle>,
        locator,
        fast_config(),
    )
}

#[tokio::test]
async fn search_fills_the_query_box_and_submits() {
    let driver = Arc::new(MockDriver::new());
    driver.add_element("input[name='q']", ElementRef("q-1".into()));

    let oracle = ScriptedOracle::new(vec![
        Some(ProposedAction::new(ActionKind::Search).with_param("query", "cats")),
        Some(ProposedAction::new(ActionKind::Complete).with_param("message", "Search results shown")),
    ]);
    let mut pilot = orchestrator(driver.clone(), oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("search for cats").await;
    assert!(report.is_success());
    assert_eq!(report.steps_completed, 2);
    assert_eq!(report.results[0].outcome.message, "Performed search for: cats");
    assert_eq!(report.results[1].outcome.message, "Search results shown");

    let typed = driver.typed();
    assert_eq!(typed[0], ("q-1".to_string(), "cats".to_string()));
    assert_eq!(typed[1], ("q-1".to_string(), KEY_RETURN.to_string()));
}

#[tokio::test]
async fn descriptive_click_falls_back_to_screen_text() {
    let driver = Arc::new(MockDriver::new());

    // No selector matches anywhere; the screen-text tier supplies the point.
    let oracle = ScriptedOracle::new(vec![
        Some(
            ProposedAction::new(ActionKind::Click)
                .with_param("selector", "Add to cart")
                .with_dom_hint("button.stale"),
        ),
        Some(ProposedAction::new(ActionKind::Complete).with_param("message", "Item added")),
    ]);
    let mut pilot = orchestrator(driver.clone(), oracle, Arc::new(FixedLocator::at(125, 210)));

    let report = pilot.run("add the item to the cart").await;
    assert!(report.is_success());
    assert_eq!(
        report.results[0].outcome.message,
        "Clicked at coordinates (125, 210)"
    );
    assert!(driver
        .script_calls()
        .iter()
        .any(|s| s.contains("elementFromPoint")));
}

#[tokio::test]
async fn missing_target_is_retried_once_and_leaves_one_record() {
    let driver = Arc::new(MockDriver::new());

    let oracle = ScriptedOracle::new(vec![Some(
        ProposedAction::new(ActionKind::Click)
            .with_param("selector", "#missing")
            .with_dom_hint("#missing"),
    )]);
    let mut pilot = orchestrator(driver.clone(), oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("click the missing thing").await;
    assert!(!report.is_success());
    // The retry collapses into the original record rather than adding one.
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].outcome.message.contains("not found"));
}

#[tokio::test]
async fn first_step_search_without_a_box_detours_to_the_engine() {
    let driver = Arc::new(MockDriver::new());
    driver.set_current_url("about:blank");

    let oracle = ScriptedOracle::new(vec![Some(
        ProposedAction::new(ActionKind::Search).with_param("query", "rust tutorials"),
    )]);
    let mut pilot = orchestrator(driver.clone(), oracle, Arc::new(FixedLocator::miss()));
    let report = pilot.run("search for rust tutorials").await;

    // No box exists even on the engine page, so the retry also fails and
    // the original failure stands as the only record.
    assert!(!report.is_success());
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].outcome.message.contains("search box"));
    // But the detour itself did navigate to the engine first.
    assert_eq!(driver.navigations(), vec!["https://www.google.com"]);
}

/// Locator that misses a fixed number of lookups before it starts hitting.
struct WarmupLocator {
    misses: std::sync::Mutex<u32>,
    point: webpilot::locator::Point,
}

#[async_trait::async_trait]
impl TextLocator for WarmupLocator {
    async fn locate(
        &self,
        _target: &str,
        _confidence_threshold: i64,
    ) -> webpilot::errors::PilotResult<Option<webpilot::locator::Point>> {
        let mut misses = self.misses.lock().unwrap();
        if *misses > 0 {
            *misses -= 1;
            Ok(None)
        } else {
            Ok(Some(self.point))
        }
    }
}

#[tokio::test]
async fn recovered_click_replaces_its_failed_record() {
    let driver = Arc::new(MockDriver::new());

    let oracle = ScriptedOracle::new(vec![
        Some(ProposedAction::new(ActionKind::Click).with_param("selector", "Load more")),
        Some(ProposedAction::new(ActionKind::Complete).with_param("message", "All items visible")),
    ]);
    // The target text only becomes visible for the retry, as if the page
    // finished rendering during the recovery settle.
    let locator = Arc::new(WarmupLocator {
        misses: std::sync::Mutex::new(1),
        point: webpilot::locator::Point { x: 50, y: 400 },
    });
    let mut pilot = orchestrator(driver.clone(), oracle, locator);

    let report = pilot.run("load the remaining items").await;
    assert!(report.is_success());
    assert_eq!(report.results.len(), 2);
    // The failed first attempt was replaced by the recovered outcome.
    assert_eq!(
        report.results[0].outcome.message,
        "Clicked at coordinates (50, 400)"
    );
}

#[tokio::test]
async fn completion_mid_session_ends_the_loop_successfully() {
    let driver = Arc::new(MockDriver::new());
    driver.add_element("#details", ElementRef("el-1".into()));

    let oracle = ScriptedOracle::new(vec![
        Some(ProposedAction::new(ActionKind::Navigate).with_param("url", "https://example.com")),
        Some(
            ProposedAction::new(ActionKind::Click)
                .with_param("selector", "details link")
                .with_dom_hint("#details"),
        ),
        Some(
            ProposedAction::new(ActionKind::Complete)
                .with_param("message", "Task completed (current URL: https://example.com/details)"),
        ),
        // Never reached.
        Some(ProposedAction::new(ActionKind::Wait).with_param("seconds", "1")),
    ]);
    let mut pilot = orchestrator(driver.clone(), oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("open the details page").await;
    assert!(report.is_success());
    assert_eq!(report.steps_completed, 3);
    assert_eq!(report.results[2].kind, ActionKind::Complete);
    assert_eq!(driver.clicked(), vec!["el-1"]);
}

#[tokio::test]
async fn three_consecutive_failures_abort_the_session() {
    let driver = Arc::new(MockDriver::new());

    let click_missing = || {
        Some(
            ProposedAction::new(ActionKind::Click)
                .with_param("selector", "#gone")
                .with_dom_hint("#gone"),
        )
    };
    let oracle = ScriptedOracle::new(vec![
        click_missing(),
        click_missing(),
        click_missing(),
        click_missing(),
        click_missing(),
    ]);
    let mut pilot = orchestrator(driver, oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("click something that never exists").await;
    assert!(!report.is_success());
    // Aborts at the third unrecovered failure, leaving two proposals unused.
    assert_eq!(report.results.len(), 3);
    assert!(report
        .results
        .iter()
        .all(|step| !step.outcome.is_success()));
}

#[tokio::test]
async fn oracle_silence_ends_with_whatever_happened_so_far() {
    let driver = Arc::new(MockDriver::new());

    let oracle = ScriptedOracle::new(vec![
        Some(ProposedAction::new(ActionKind::Navigate).with_param("url", "https://example.com")),
        None,
    ]);
    let mut pilot = orchestrator(driver, oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("do something vague").await;
    // One successful step, then the oracle bailed: still a success overall.
    assert!(report.is_success());
    assert_eq!(report.steps_completed, 1);
}

#[tokio::test]
async fn step_budget_bounds_the_loop() {
    let driver = Arc::new(MockDriver::new());

    let oracle = ScriptedOracle::new(
        std::iter::repeat_with(|| {
            Some(ProposedAction::new(ActionKind::Wait).with_param("seconds", "0"))
        })
        .take(30)
        .collect::<Vec<_>>(),
    );
    let mut pilot = orchestrator(driver, oracle, Arc::new(FixedLocator::miss()));

    let report = pilot.run("wait forever").await;
    assert_eq!(report.steps_completed, 15);
}

#[tokio::test]
async fn dom_summary_reaches_the_oracle() {
    let driver = Arc::new(MockDriver::new());
    let oracle = Arc::new(ScriptedOracle::new(vec![None]));

    let mut pilot = Orchestrator::new(
        driver as Arc<dyn BrowserDriver>,
        oracle.clone() as Arc<dyn DecisionOracle>,
        Arc::new(FixedLocator::miss()) as Arc<dyn TextLocator>,
        fast_config(),
    );
    let report = pilot.run("anything").await;
    assert!(report.results.is_empty());

    // The capture script returned nothing, so the oracle saw the empty
    // placeholder summary.
    assert_eq!(oracle.seen_summaries(), vec!["No interactive elements found."]);
}
