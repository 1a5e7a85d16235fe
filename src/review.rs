use chrono::{DateTime, Utc};

use crate::card::{self, Card};
use crate::sm2::{self, Quality, ReviewState};

pub struct ReviewItem {
    pub card_index: usize,
    pub front_display: String,
    pub reveal_display: String,
    pub deck: String,
}

pub struct DeckSummary {
    pub name: String,
    pub total: usize,
    pub due: usize,
}

pub fn render_front(text: &str) -> String {
    card::expand_newlines(text)
}

pub fn render_reveal(front: &str, back: &str) -> String {
    let front = card::expand_newlines(front);
    let back = card::expand_newlines(back);

    if back.trim().is_empty() {
        front
    } else {
        format!("{front}\n---\n{back}")
    }
}

pub fn build_review_items(cards: &[Card], indices: &[usize]) -> Vec<ReviewItem> {
    indices
        .iter()
        .map(|&i| {
            let card = &cards[i];
            ReviewItem {
                card_index: i,
                front_display: render_front(&card.front),
                reveal_display: render_reveal(&card.front, &card.back),
                deck: card.deck.clone(),
            }
        })
        .collect()
}

pub fn filter_due(cards: &[Card], now: DateTime<Utc>) -> Vec<usize> {
    cards
        .iter()
        .enumerate()
        .filter(|(_, card)| match &card.review {
            None => true, // new card
            Some(r) => r.due_at <= now,
        })
        .map(|(i, _)| i)
        .collect()
}

pub fn deck_summaries(cards: &[Card], now: DateTime<Utc>) -> Vec<DeckSummary> {
    let mut decks: std::collections::BTreeMap<String, (usize, usize)> =
        std::collections::BTreeMap::new();
    for card in cards {
        let entry = decks.entry(card.deck.clone()).or_insert((0, 0));
        entry.0 += 1;
        let is_due = match &card.review {
            None => true,
            Some(r) => r.due_at <= now,
        };
        if is_due {
            entry.1 += 1;
        }
    }
    decks
        .into_iter()
        .map(|(name, (total, due))| DeckSummary { name, total, due })
        .collect()
}

/// Grade a card, creating its review state on first grading.
pub fn apply_grade(card: &mut Card, quality: Quality, now: DateTime<Utc>) {
    let current = card.review.unwrap_or_else(|| ReviewState::new(now));
    card.review = Some(sm2::schedule_next_review(&current, quality, now));
}
