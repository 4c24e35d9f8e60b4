//! Keyword-weighted persona routing
//!
//! Pure function over the conversation state: scores the latest user
//! message against weighted keyword groups per domain persona, applies
//! sticky-continuation policy, and honors explicit reset phrases.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use callpilot_config::RouterConfig;
use callpilot_core::{AgentKind, ConversationState};

/// Routing outcome for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub agent: AgentKind,
    pub confidence: f32,
    pub reason: String,
}

struct KeywordGroup {
    pattern: Regex,
    weight: i32,
}

fn group(pattern: &str, weight: i32) -> KeywordGroup {
    KeywordGroup {
        pattern: Regex::new(pattern).expect("static routing pattern"),
        weight,
    }
}

static FINANCIAL_GROUPS: Lazy<Vec<KeywordGroup>> = Lazy::new(|| {
    vec![
        group(
            r"\b(bill|billed|billing|charge|charged|overcharge[d]?|refund|payment|invoice|fee|fees)\b",
            3,
        ),
        group(r"\b(bank|credit card|debit card|statement|transaction)\b", 2),
        group(r"\b(dispute|fraud|fraudulent|unauthorized)\b", 2),
    ]
});

static INSURANCE_GROUPS: Lazy<Vec<KeywordGroup>> = Lazy::new(|| {
    vec![
        group(r"\b(insurance|claim|claims|coverage|policy number|insurer)\b", 3),
        group(r"\b(deductible|premium|copay|denied|denial|appeal)\b", 2),
    ]
});

static BOOKING_GROUPS: Lazy<Vec<KeywordGroup>> = Lazy::new(|| {
    vec![
        group(
            r"\b(reservation|booking|book a|appointment|reschedule|rebook)\b",
            3,
        ),
        group(r"\b(flight|hotel|restaurant|table for|waitlist|check[- ]in)\b", 2),
    ]
});

static ACCOUNT_GROUPS: Lazy<Vec<KeywordGroup>> = Lazy::new(|| {
    vec![
        group(
            r"\b(subscription|account locked|locked out|login|log in|password|username)\b",
            3,
        ),
        group(
            r"\b(upgrade|downgrade|my plan|plan change|close my account|transfer (my )?service)\b",
            2,
        ),
    ]
});

static SUPPORT_GROUPS: Lazy<Vec<KeywordGroup>> = Lazy::new(|| {
    vec![
        group(
            r"\b(wifi|wi-fi|internet|connection|outage|not working|broken|won'?t turn on|no service)\b",
            3,
        ),
        group(r"\b(slow|lagging|restart|rebooted|error code|device)\b", 2),
    ]
});

/// Billing vocabulary used for the support cross-domain penalty: an outage
/// complaint that is really about a charge belongs with financial.
static BILLING_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(bill|billed|billing|charge[d]?|overcharge[d]?|refund|invoice)\b")
        .expect("static routing pattern")
});

/// Phrases that force a return to the neutral persona. Bare "cancel" only
/// counts when it is the whole message; "cancel my flight" is a booking
/// request, not a reset.
static RESET_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(start over|start again|new topic|different topic|never ?mind|forget (it|that))\b")
        .expect("static routing pattern")
});

fn is_reset(message: &str) -> bool {
    if RESET_PHRASES.is_match(message) {
        return true;
    }
    let bare = message.trim().trim_end_matches(['.', '!']);
    bare == "cancel" || bare == "cancel that"
}

fn groups_for(agent: AgentKind) -> &'static [KeywordGroup] {
    match agent {
        AgentKind::Financial => &FINANCIAL_GROUPS,
        AgentKind::Insurance => &INSURANCE_GROUPS,
        AgentKind::Booking => &BOOKING_GROUPS,
        AgentKind::Account => &ACCOUNT_GROUPS,
        AgentKind::Support => &SUPPORT_GROUPS,
        AgentKind::Router => &[],
    }
}

fn score_domain(agent: AgentKind, message: &str) -> i32 {
    let mut score: i32 = groups_for(agent)
        .iter()
        .filter(|g| g.pattern.is_match(message))
        .map(|g| g.weight)
        .sum();

    // Co-occurring billing vocabulary pulls support matches toward financial.
    if agent == AgentKind::Support && score > 0 && BILLING_TERMS.is_match(message) {
        score -= 2;
    }

    score.max(0)
}

/// Map a raw keyword score onto the configured confidence ladder.
fn confidence_for(score: i32, config: &RouterConfig) -> f32 {
    match score {
        i32::MIN..=0 => 0.0,
        1 => config.low_confidence,
        2 => config.medium_confidence,
        3..=5 => config.switch_threshold,
        _ => 0.9,
    }
}

/// Select the persona for the next turn.
pub fn route(state: &ConversationState, config: &RouterConfig) -> RouteDecision {
    let current = state.current_agent;
    let message = match state.latest_user_text() {
        Some(text) => text.to_ascii_lowercase(),
        None => {
            return RouteDecision {
                agent: current,
                confidence: config.sticky_confidence,
                reason: "no user message to score".to_string(),
            }
        }
    };

    if is_reset(&message) {
        return RouteDecision {
            agent: AgentKind::Router,
            confidence: 1.0,
            reason: "reset phrase in message".to_string(),
        };
    }

    // Fixed priority order breaks score ties; the active persona wins a
    // tie it participates in.
    let mut best = AgentKind::Router;
    let mut best_score = 0;
    let mut positive_domains = 0;
    for agent in AgentKind::specialists() {
        let score = score_domain(agent, &message);
        debug!(agent = %agent, score, "domain score");
        if score > 0 {
            positive_domains += 1;
        }
        if score > best_score || (score == best_score && score > 0 && agent == current) {
            best = agent;
            best_score = score;
        }
    }

    if best_score == 0 {
        // No domain signal. A specialist keeps the conversation as casual
        // continuation; the neutral persona just keeps talking.
        return if current.is_specialist() {
            RouteDecision {
                agent: current,
                confidence: config.sticky_confidence,
                reason: format!("no new domain signal, continuing with {}", current),
            }
        } else {
            RouteDecision {
                agent: AgentKind::Router,
                confidence: config.medium_confidence,
                reason: "no domain signal".to_string(),
            }
        };
    }

    let confidence = confidence_for(best_score, config);

    if best == current {
        return RouteDecision {
            agent: current,
            confidence,
            reason: format!("continuing with {}", current),
        };
    }

    if current.is_specialist() {
        let current_score = score_domain(current, &message);
        let only_positive = positive_domains == 1 && current_score == 0;
        if confidence < config.switch_threshold && !only_positive {
            return RouteDecision {
                agent: current,
                confidence: config.sticky_confidence,
                reason: format!("weak {} signal, staying with {}", best, current),
            };
        }
    }

    RouteDecision {
        agent: best,
        confidence,
        reason: format!("{} keywords in latest message", best),
    }
}
