//! Click-target resolution.
//!
//! A click proposal rarely arrives as a clean selector. Resolution tries
//! four strategies in a fixed order and stops at the first hit:
//!
//! 1. the oracle's structural selector hint,
//! 2. explicit coordinates in the action parameters,
//! 3. optical lookup of the descriptive target text on screen,
//! 4. the descriptive text interpreted as a CSS selector.
//!
//! A miss on every tier is reported with the list of tiers that were
//! actually attempted, so transcripts show why a click had nothing to aim
//! at.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::driver::BrowserDriver;
use crate::locator::{Point, TextLocator};
use crate::oracle::ProposedAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Selector(String),
    Coordinates(Point),
}

/// Every applicable tier missed. The message wording doubles as the step's
/// error outcome, and the retry rule keys on it containing "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveFailure {
    pub attempted: Vec<&'static str>,
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempted.is_empty() {
            write!(f, "Element not found: click action carried no target")
        } else {
            write!(
                f,
                "Element not found: no click target resolved (tried {})",
                self.attempted.join(", ")
            )
        }
    }
}

pub struct TargetResolver {
    driver: Arc<dyn BrowserDriver>,
    locator: Arc<dyn TextLocator>,
    confidence_threshold: i64,
}

impl TargetResolver {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        locator: Arc<dyn TextLocator>,
        confidence_threshold: i64,
    ) -> Self {
        Self {
            driver,
            locator,
            confidence_threshold,
        }
    }

    pub async fn resolve(&self, action: &ProposedAction) -> Result<ResolvedTarget, ResolveFailure> {
        let mut attempted = Vec::new();

        if let Some(hint) = action.dom_hint.as_deref() {
            attempted.push("selector hint");
            if let Ok(Some(_)) = self.driver.find_element(hint).await {
                debug!(selector = hint, "target resolved via selector hint");
                return Ok(ResolvedTarget::Selector(hint.to_string()));
            }
            debug!(selector = hint, "selector hint matched nothing");
        }

        if let Some((x, y)) = action.coordinates() {
            attempted.push("coordinates");
            debug!(x, y, "target resolved via explicit coordinates");
            return Ok(ResolvedTarget::Coordinates(Point { x, y }));
        }

        if let Some(target) = action.descriptive_target() {
            attempted.push("screen text");
            match self.locator.locate(target, self.confidence_threshold).await {
                Ok(Some(point)) => {
                    debug!(target, x = point.x, y = point.y, "target resolved via screen text");
                    return Ok(ResolvedTarget::Coordinates(point));
                }
                Ok(None) => debug!(target, "no screen text match"),
                Err(err) => debug!(target, %err, "screen text lookup failed"),
            }

            attempted.push("descriptive selector");
            if let Ok(Some(_)) = self.driver.find_element(target).await {
                debug!(selector = target, "target resolved via descriptive selector");
                return Ok(ResolvedTarget::Selector(target.to_string()));
            }
        }

        Err(ResolveFailure { attempted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ElementRef;
    use crate::oracle::{ActionKind, ProposedAction};
    use crate::testing::{FixedLocator, MockDriver};

    fn resolver(driver: MockDriver, locator: FixedLocator) -> TargetResolver {
        TargetResolver::new(Arc::new(driver), Arc::new(locator), 60)
    }

    #[tokio::test]
    async fn selector_hint_wins_when_present_on_page() {
        let driver = MockDriver::new();
        driver.add_element("button.buy", ElementRef("el-1".into()));
        let resolver = resolver(driver, FixedLocator::miss());

        let action = ProposedAction::new(ActionKind::Click)
            .with_param("selector", "Buy now")
            .with_dom_hint("button.buy");
        assert_eq!(
            resolver.resolve(&action).await,
            Ok(ResolvedTarget::Selector("button.buy".into()))
        );
    }

    #[tokio::test]
    async fn stale_hint_falls_through_to_screen_text() {
        let driver = MockDriver::new();
        let resolver = resolver(driver, FixedLocator::at(125, 210));

        let action = ProposedAction::new(ActionKind::Click)
            .with_param("selector", "Buy now")
            .with_dom_hint("button.gone");
        assert_eq!(
            resolver.resolve(&action).await,
            Ok(ResolvedTarget::Coordinates(Point { x: 125, y: 210 }))
        );
    }

    #[tokio::test]
    async fn explicit_coordinates_skip_optical_lookup() {
        let resolver = resolver(MockDriver::new(), FixedLocator::at(1, 1));

        let action = ProposedAction::new(ActionKind::Click)
            .with_param("x", "40")
            .with_param("y", "80");
        assert_eq!(
            resolver.resolve(&action).await,
            Ok(ResolvedTarget::Coordinates(Point { x: 40, y: 80 }))
        );
    }

    #[tokio::test]
    async fn descriptive_text_can_be_a_real_selector() {
        let driver = MockDriver::new();
        driver.add_element("#submit", ElementRef("el-2".into()));
        let resolver = resolver(driver, FixedLocator::miss());

        let action = ProposedAction::new(ActionKind::Click).with_param("selector", "#submit");
        assert_eq!(
            resolver.resolve(&action).await,
            Ok(ResolvedTarget::Selector("#submit".into()))
        );
    }

    #[tokio::test]
    async fn total_miss_names_attempted_tiers() {
        let resolver = resolver(MockDriver::new(), FixedLocator::miss());

        let action = ProposedAction::new(ActionKind::Click)
            .with_param("selector", "Elusive button")
            .with_dom_hint("button.gone");
        let failure = resolver.resolve(&action).await.unwrap_err();
        assert_eq!(
            failure.attempted,
            vec!["selector hint", "screen text", "descriptive selector"]
        );
        let message = failure.to_string();
        assert!(message.contains("not found"));
        assert!(message.contains("selector hint, screen text, descriptive selector"));
    }

    #[tokio::test]
    async fn click_without_any_target_information() {
        let resolver = resolver(MockDriver::new(), FixedLocator::miss());

        let action = ProposedAction::new(ActionKind::Click);
        let failure = resolver.resolve(&action).await.unwrap_err();
        assert!(failure.attempted.is_empty());
    }
}
