//! Rotating browser-like User-Agent strings for source adapter traffic.
//!
//! Amazon search pages are served differently to obvious bots, so adapter
//! requests carry one of a small pool of browser UA strings, picked at
//! random per request.

use rand::seq::SliceRandom;

/// Browser UA pool shared by all source adapters.
pub(crate) const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

/// Picks a User-Agent string from the pool at random.
#[must_use]
pub(crate) fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    BROWSER_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}
