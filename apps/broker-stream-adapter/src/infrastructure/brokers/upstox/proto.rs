//! Upstox market data feed v3 messages.
//!
//! Only the messages the adapter reads are declared; prost skips unknown
//! fields (option greeks, market info details).

#![allow(clippy::derive_partial_eq_without_eq, missing_docs)]

use std::collections::HashMap;

/// Top-level message of every binary frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeedResponse {
    #[prost(enumeration = "FeedType", tag = "1")]
    pub r#type: i32,
    #[prost(map = "string, message", tag = "2")]
    pub feeds: HashMap<String, Feed>,
    #[prost(int64, tag = "3")]
    pub current_ts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FeedType {
    InitialFeed = 0,
    LiveFeed = 1,
    MarketInfo = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RequestMode {
    Ltpc = 0,
    FullD5 = 1,
    OptionGreeks = 2,
    FullD30 = 3,
}

/// Data for one instrument key.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feed {
    #[prost(oneof = "feed::FeedUnion", tags = "1, 2")]
    pub feed_union: Option<feed::FeedUnion>,
    #[prost(enumeration = "RequestMode", tag = "4")]
    pub request_mode: i32,
}

pub mod feed {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum FeedUnion {
        #[prost(message, tag = "1")]
        Ltpc(super::Ltpc),
        #[prost(message, tag = "2")]
        FullFeed(super::FullFeed),
    }
}

/// Last traded price, time, quantity and previous close.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ltpc {
    #[prost(double, tag = "1")]
    pub ltp: f64,
    #[prost(int64, tag = "2")]
    pub ltt: i64,
    #[prost(int64, tag = "3")]
    pub ltq: i64,
    #[prost(double, tag = "4")]
    pub cp: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FullFeed {
    #[prost(oneof = "full_feed::FullFeedUnion", tags = "1, 2")]
    pub full_feed_union: Option<full_feed::FullFeedUnion>,
}

pub mod full_feed {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum FullFeedUnion {
        #[prost(message, tag = "1")]
        MarketFf(super::MarketFullFeed),
        #[prost(message, tag = "2")]
        IndexFf(super::IndexFullFeed),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub market_level: Option<MarketLevel>,
    #[prost(message, optional, tag = "4")]
    pub market_ohlc: Option<MarketOhlc>,
    #[prost(double, tag = "5")]
    pub atp: f64,
    #[prost(int64, tag = "6")]
    pub vtt: i64,
    #[prost(double, tag = "7")]
    pub oi: f64,
    #[prost(double, tag = "9")]
    pub tbq: f64,
    #[prost(double, tag = "10")]
    pub tsq: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub market_ohlc: Option<MarketOhlc>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketLevel {
    #[prost(message, repeated, tag = "1")]
    pub bid_ask_quote: Vec<Quote>,
}

/// One bid/ask pair at a book level.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Quote {
    #[prost(int64, tag = "1")]
    pub bid_q: i64,
    #[prost(double, tag = "2")]
    pub bid_p: f64,
    #[prost(int64, tag = "3")]
    pub ask_q: i64,
    #[prost(double, tag = "4")]
    pub ask_p: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketOhlc {
    #[prost(message, repeated, tag = "1")]
    pub ohlc: Vec<Ohlc>,
}

/// One candle; the day bar has interval `1d`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ohlc {
    #[prost(string, tag = "1")]
    pub interval: String,
    #[prost(double, tag = "2")]
    pub open: f64,
    #[prost(double, tag = "3")]
    pub high: f64,
    #[prost(double, tag = "4")]
    pub low: f64,
    #[prost(double, tag = "5")]
    pub close: f64,
    #[prost(int64, tag = "6")]
    pub vol: i64,
    #[prost(int64, tag = "7")]
    pub ts: i64,
}
