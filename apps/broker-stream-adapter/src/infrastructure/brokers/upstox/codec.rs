//! Upstox feed decoding.
//!
//! Binary frames are protobuf [`FeedResponse`] messages holding a map from
//! instrument key (`NSE_EQ|INE002A01018`) to feed. LTPC feeds only carry the
//! last trade, so they are partial; full feeds are complete snapshots.

use prost::Message;

use super::mapping::decimals;
use super::proto::{FeedResponse, FeedType, Ltpc, MarketOhlc, Quote, feed, full_feed};
use crate::domain::streaming::price;
use crate::domain::streaming::{DEFAULT_DEPTH, DepthLevel, DepthUpdate, TickFields};
use crate::infrastructure::brokers::codec::{CodecError, float_qty};

/// Interval name of the day candle.
const DAY_INTERVAL: &str = "1d";

/// Decoded Upstox frame.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstoxFrame {
    /// Data for one instrument key.
    Tick(UpstoxTick),
    /// Market status broadcast.
    MarketInfo,
    /// Text notice from the server.
    Notice(String),
}

/// One instrument's feed, prices rounded for its segment.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstoxTick {
    /// Segment part of the instrument key.
    pub segment: String,
    /// Identifier part of the instrument key.
    pub token: String,
    /// LTPC-only feed.
    pub partial: bool,
    /// Scalar fields.
    pub fields: TickFields,
    /// Book levels, market full feeds only.
    pub depth: Option<DepthUpdate>,
}

/// Decode one binary frame.
///
/// # Errors
///
/// Fails when the frame is not a valid `FeedResponse`.
pub fn decode_binary(buf: &[u8]) -> Result<Vec<UpstoxFrame>, CodecError> {
    let response = FeedResponse::decode(buf)?;
    if matches!(FeedType::try_from(response.r#type), Ok(FeedType::MarketInfo)) {
        return Ok(vec![UpstoxFrame::MarketInfo]);
    }

    let mut frames = Vec::with_capacity(response.feeds.len());
    for (key, entry) in response.feeds {
        let Some((segment, token)) = key.split_once('|') else {
            tracing::debug!(key = %key, "Skipping feed with malformed instrument key");
            continue;
        };
        let Some(union) = entry.feed_union else {
            continue;
        };
        let places = decimals(segment);
        let mut tick = UpstoxTick {
            segment: segment.to_string(),
            token: token.to_string(),
            partial: false,
            fields: TickFields::default(),
            depth: None,
        };

        match union {
            feed::FeedUnion::Ltpc(ltpc) => {
                tick.partial = true;
                apply_ltpc(&mut tick.fields, &ltpc, places);
            }
            feed::FeedUnion::FullFeed(full) => match full.full_feed_union {
                Some(full_feed::FullFeedUnion::MarketFf(market)) => {
                    if let Some(ltpc) = &market.ltpc {
                        apply_ltpc(&mut tick.fields, ltpc, places);
                    }
                    apply_ohlc(&mut tick.fields, market.market_ohlc.as_ref(), places);
                    tick.fields.average_price = Some(price::round(market.atp, places));
                    tick.fields.volume = Some(market.vtt);
                    tick.fields.oi = Some(float_qty(market.oi));
                    tick.fields.total_buy_qty = Some(float_qty(market.tbq));
                    tick.fields.total_sell_qty = Some(float_qty(market.tsq));
                    if let Some(level) = &market.market_level {
                        let depth = book(&level.bid_ask_quote, places);
                        tick.fields.bid = depth.best_bid();
                        tick.fields.ask = depth.best_ask();
                        tick.depth = Some(depth);
                    }
                }
                Some(full_feed::FullFeedUnion::IndexFf(index)) => {
                    if let Some(ltpc) = &index.ltpc {
                        apply_ltpc(&mut tick.fields, ltpc, places);
                    }
                    apply_ohlc(&mut tick.fields, index.market_ohlc.as_ref(), places);
                }
                None => continue,
            },
        }

        if tick.fields.timestamp.is_none() && response.current_ts > 0 {
            tick.fields.timestamp = Some(response.current_ts);
        }
        frames.push(UpstoxFrame::Tick(tick));
    }

    Ok(frames)
}

fn apply_ltpc(fields: &mut TickFields, ltpc: &Ltpc, places: u32) {
    fields.ltp = Some(price::round(ltpc.ltp, places));
    fields.ltq = Some(ltpc.ltq);
    fields.close = Some(price::round(ltpc.cp, places));
    if ltpc.ltt > 0 {
        fields.timestamp = Some(ltpc.ltt);
    }
}

fn apply_ohlc(fields: &mut TickFields, ohlc: Option<&MarketOhlc>, places: u32) {
    let Some(day) = ohlc.and_then(|o| o.ohlc.iter().find(|c| c.interval == DAY_INTERVAL)) else {
        return;
    };
    fields.open = Some(price::round(day.open, places));
    fields.high = Some(price::round(day.high, places));
    fields.low = Some(price::round(day.low, places));
    if fields.volume.is_none() && day.vol > 0 {
        fields.volume = Some(day.vol);
    }
}

fn book(quotes: &[Quote], places: u32) -> DepthUpdate {
    let levels = quotes.iter().take(usize::from(DEFAULT_DEPTH));
    DepthUpdate::from_levels(
        levels
            .clone()
            .map(|q| DepthLevel::new(price::round(q.bid_p, places), q.bid_q, 0)),
        levels.map(|q| DepthLevel::new(price::round(q.ask_p, places), q.ask_q, 0)),
    )
}
