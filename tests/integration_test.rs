//! End-to-end tests over the in-memory SQLite store: platform and
//! transaction flows, currency-converted aggregation, pagination and the
//! rate refresh protocol.

mod common;

use std::str::FromStr;
use std::time::Duration;

use common::*;
use finledger::domain::error::LedgerError;
use finledger::domain::money::Currency;
use finledger::domain::overview;
use finledger::domain::pagination;
use finledger::domain::platform::{self, NewPlatform, PlatformPatch};
use finledger::domain::rates::{self, RateProvenance, RateTable};
use finledger::domain::settings;
use finledger::domain::transaction;
use finledger::ports::rate_source_port::RateSource;
use finledger::ports::store_port::LedgerStore;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

mod platforms {
    use super::*;

    #[test]
    fn create_list_and_stats() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "1000");
        add_transaction(&store, platform.id, "2024-03-01T10:00:00", "150", "10");

        let stats = platform::get_platform(&store, platform.id).unwrap();
        assert_eq!(stats.total_realized_profit, dec("140"));
        assert_eq!(stats.total_capital, dec("1140"));
        assert_eq!(stats.change_percent.to_string(), "14.00");
        assert_eq!(stats.transaction_count, 1);

        let all = platform::list_platforms(&store).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn zero_initial_capital_has_zero_change_percent() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "0");
        add_transaction(&store, platform.id, "2024-03-01T10:00:00", "500", "0");

        let stats = platform::get_platform(&store, platform.id).unwrap();
        assert_eq!(stats.change_percent, Decimal::ZERO);
        assert_eq!(stats.total_realized_profit, dec("500"));
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let store = store();
        add_platform(&store, "Binance", Currency::USD, "0");
        let result = platform::create_platform(
            &store,
            NewPlatform {
                name: "Binance".into(),
                currency: Currency::CNY,
                initial_capital: None,
            },
        );
        assert!(matches!(result, Err(LedgerError::Conflict { .. })));
    }

    #[test]
    fn delete_cascades_and_missing_is_not_found() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "1000");
        add_transaction(&store, platform.id, "2024-03-01T10:00:00", "1", "0");

        platform::delete_platform(&store, platform.id).unwrap();
        assert!(matches!(
            platform::get_platform(&store, platform.id),
            Err(LedgerError::NotFound { .. })
        ));
        assert_eq!(store.count_transactions(None).unwrap(), 0);

        assert!(matches!(
            platform::delete_platform(&store, 999),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn currency_change_reinterprets_history() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "1000");

        let report = overview::overview(&store, Currency::CNY).unwrap();
        assert_eq!(report.platforms[0].initial_capital.converted, dec("7240"));

        // Amounts are plain decimals; switching the currency relabels them.
        platform::update_platform(
            &store,
            platform.id,
            PlatformPatch {
                currency: Some(Currency::CNY),
                ..Default::default()
            },
        )
        .unwrap();
        let report = overview::overview(&store, Currency::CNY).unwrap();
        assert_eq!(report.platforms[0].exchange_rate, 1.0);
        assert_eq!(report.platforms[0].initial_capital.converted, dec("1000"));
    }
}

mod aggregation {
    use super::*;

    #[test]
    fn overview_converts_with_seeded_usd_rate() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "1000");
        add_transaction(&store, platform.id, "2024-03-01T10:00:00", "150", "10");

        let report = overview::overview(&store, Currency::CNY).unwrap();
        let entry = &report.platforms[0];
        assert_eq!(entry.exchange_rate, 7.24);
        assert!(!entry.rate_fallback);
        assert_eq!(entry.initial_capital.original, dec("1000"));
        assert_eq!(entry.initial_capital.converted, dec("7240"));
        assert_eq!(entry.total_realized_profit.converted, dec("1013.6"));
        assert_eq!(entry.change_percent.to_string(), "14.00");

        assert_eq!(report.summary.total_capital, dec("8253.6"));
        assert_eq!(report.summary.total_transactions, 1);
    }

    #[test]
    fn summary_sums_after_conversion() {
        let store = store();
        let usd = add_platform(&store, "Binance", Currency::USD, "1000");
        let hkd = add_platform(&store, "HKEX", Currency::HKD, "2000");
        add_transaction(&store, usd.id, "2024-03-01T10:00:00", "150", "10");
        add_transaction(&store, hkd.id, "2024-03-02T10:00:00", "50", "0");

        let report = overview::overview(&store, Currency::CNY).unwrap();
        let mut initial = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut capital = Decimal::ZERO;
        for entry in &report.platforms {
            initial += entry.initial_capital.converted;
            realized += entry.total_realized_profit.converted;
            capital += entry.total_capital.converted;
        }
        assert_eq!(report.summary.total_initial_capital, initial);
        assert_eq!(report.summary.total_realized_profit, realized);
        assert_eq!(report.summary.total_capital, capital);
        // 140 * 7.24 + 50 * 0.92
        assert_eq!(realized, dec("1059.6"));
    }

    #[test]
    fn distribution_floors_negative_capital_at_zero() {
        let store = store();
        let busted = add_platform(&store, "Busted", Currency::CNY, "100");
        add_platform(&store, "Solvent", Currency::CNY, "400");
        add_transaction(&store, busted.id, "2024-03-01T10:00:00", "-500", "0");

        let report = overview::distribution(&store, Currency::CNY).unwrap();
        let entry = |name: &str| {
            report
                .distribution
                .iter()
                .find(|e| e.name == name)
                .unwrap()
                .clone()
        };
        assert_eq!(entry("Busted").value, Decimal::ZERO);
        assert_eq!(entry("Busted").percent, Decimal::ZERO);
        assert_eq!(entry("Solvent").value, dec("400"));
        assert_eq!(entry("Solvent").percent.to_string(), "100.00");
        assert_eq!(report.total, dec("400"));
    }

    #[test]
    fn distribution_of_empty_ledger_is_all_zero() {
        let store = store();
        add_platform(&store, "Empty", Currency::CNY, "0");
        let report = overview::distribution(&store, Currency::CNY).unwrap();
        assert_eq!(report.total, Decimal::ZERO);
        assert_eq!(report.distribution[0].percent, Decimal::ZERO);
    }

    #[test]
    fn trend_buckets_by_close_month_and_skips_open_positions() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "1000");
        add_closed_transaction(
            &store,
            platform.id,
            "2024-03-01T10:00:00",
            "2024-03-10T10:00:00",
            "100",
        );
        add_closed_transaction(
            &store,
            platform.id,
            "2024-03-05T10:00:00",
            "2024-03-20T10:00:00",
            "-50",
        );
        add_closed_transaction(
            &store,
            platform.id,
            "2024-04-01T10:00:00",
            "2024-04-02T10:00:00",
            "10",
        );
        // Before the window, and still open: both excluded.
        add_closed_transaction(
            &store,
            platform.id,
            "2023-11-01T10:00:00",
            "2023-11-02T10:00:00",
            "999",
        );
        add_transaction(&store, platform.id, "2024-03-15T10:00:00", "999", "0");

        let today = chrono::NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let report = overview::trend_since(&store, Currency::CNY, 6, today).unwrap();

        assert_eq!(report.trend.len(), 2);
        let march = &report.trend[0];
        assert_eq!(march.month, "2024-03");
        assert_eq!(march.profit, dec("724"));
        assert_eq!(march.loss, dec("362"));
        assert_eq!(march.net, dec("362"));
        assert_eq!(march.count, 2);
        assert_eq!(report.trend[1].month, "2024-04");
    }
}

mod paging {
    use super::*;

    #[test]
    fn offset_metadata_and_order() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "0");
        for day in 1..=5 {
            add_transaction(
                &store,
                platform.id,
                &format!("2024-03-0{day}T10:00:00"),
                "0",
                "0",
            );
        }

        let page = pagination::list_transactions(&store, None, 1, 2).unwrap();
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].record.open_time, "2024-03-05T10:00:00");

        let last = pagination::list_transactions(&store, None, 3, 2).unwrap();
        assert_eq!(last.data.len(), 1);
        assert_eq!(last.data[0].record.open_time, "2024-03-01T10:00:00");
    }

    #[test]
    fn equal_open_times_tie_break_by_id_descending() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "0");
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                add_transaction(&store, platform.id, "2024-03-01T10:00:00", "0", "0")
                    .record
                    .id
                    .unwrap(),
            );
        }
        ids.reverse();

        let page = pagination::list_transactions(&store, None, 1, 10).unwrap();
        let listed: Vec<i64> = page.data.iter().map(|v| v.record.id.unwrap()).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn platform_filter_applies() {
        let store = store();
        let a = add_platform(&store, "A", Currency::USD, "0");
        let b = add_platform(&store, "B", Currency::USD, "0");
        add_transaction(&store, a.id, "2024-03-01T10:00:00", "0", "0");
        add_transaction(&store, b.id, "2024-03-02T10:00:00", "0", "0");

        let page = pagination::list_transactions(&store, Some(a.id), 1, 10).unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.data[0].record.platform_id, a.id);
    }

    #[test]
    fn invalid_cursor_token_is_rejected() {
        let store = store();
        assert!(matches!(
            pagination::list_transactions_cursor(&store, None, Some("@@not-a-token@@"), 10),
            Err(LedgerError::InvalidCursor { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Walking cursor pages visits exactly the rows an unbounded offset
        /// listing returns, in the same order, with no duplicates.
        #[test]
        fn cursor_pages_partition_the_listing(days in proptest::collection::vec(1u8..=28, 1..25)) {
            let store = store();
            let platform = add_platform(&store, "Binance", Currency::USD, "0");
            for day in &days {
                add_transaction(
                    &store,
                    platform.id,
                    &format!("2024-03-{day:02}T10:00:00"),
                    "0",
                    "0",
                );
            }

            let full = pagination::list_transactions(&store, None, 1, days.len() as i64).unwrap();
            let expected: Vec<i64> = full.data.iter().map(|v| v.record.id.unwrap()).collect();

            let mut walked = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = pagination::list_transactions_cursor(
                    &store,
                    None,
                    cursor.as_deref(),
                    3,
                )
                .unwrap();
                walked.extend(page.data.iter().map(|v| v.record.id.unwrap()));
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            prop_assert_eq!(walked, expected);
        }
    }
}

mod rate_refresh {
    use super::*;

    #[test]
    fn first_answering_source_wins_with_fallback_for_the_rest() {
        let store = store();
        let alpha = ScriptedSource::new("alpha").with_rate(Currency::USD, Currency::CNY, 7.3);
        let dead = DeadSource;
        let sources: Vec<&dyn RateSource> = vec![&dead, &alpha];

        let refreshed = rates::refresh_rates(
            &store,
            &sources,
            &RateTable::builtin_fallback(),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(refreshed.len(), 9);

        let find = |from, to| {
            refreshed
                .iter()
                .find(|r| r.from == from && r.to == to)
                .unwrap()
        };
        assert_eq!(
            find(Currency::USD, Currency::USD).source,
            RateProvenance::Fixed
        );
        let usd_cny = find(Currency::USD, Currency::CNY);
        assert_eq!(usd_cny.source, RateProvenance::Api("alpha".into()));
        assert_eq!(usd_cny.rate, 7.3);
        assert_eq!(
            find(Currency::USD, Currency::HKD).source,
            RateProvenance::Fallback
        );

        // Each pair was persisted as it was resolved.
        assert_eq!(
            store
                .get_rate(Currency::USD, Currency::CNY)
                .unwrap()
                .unwrap()
                .rate,
            7.3
        );
    }

    #[test]
    fn implausible_rates_are_ignored() {
        let store = store();
        let bogus = ScriptedSource::new("bogus").with_rate(Currency::USD, Currency::CNY, 0.0);
        let sources: Vec<&dyn RateSource> = vec![&bogus];

        let refreshed = rates::refresh_rates(
            &store,
            &sources,
            &RateTable::builtin_fallback(),
            Duration::ZERO,
        )
        .unwrap();
        let usd_cny = refreshed
            .iter()
            .find(|r| r.from == Currency::USD && r.to == Currency::CNY)
            .unwrap();
        assert_eq!(usd_cny.source, RateProvenance::Fallback);
        assert_eq!(usd_cny.rate, 7.24);
    }

    #[test]
    fn manual_override_validates_and_persists() {
        let store = store();
        rates::set_rate(&store, Currency::USD, Currency::CNY, 7.5).unwrap();
        assert_eq!(
            store
                .get_rate(Currency::USD, Currency::CNY)
                .unwrap()
                .unwrap()
                .rate,
            7.5
        );

        assert!(matches!(
            rates::set_rate(&store, Currency::USD, Currency::CNY, -1.0),
            Err(LedgerError::Validation { .. })
        ));
    }
}

mod settings_flow {
    use super::*;

    #[test]
    fn seeded_defaults_are_present() {
        let store = store();
        let all = settings::all_settings(&store).unwrap();
        assert_eq!(all.get("display_currency").map(String::as_str), Some("CNY"));
        assert_eq!(
            all.get("exchange_rate_update_interval").map(String::as_str),
            Some("3600000")
        );
    }

    #[test]
    fn upsert_get_delete_round_trip() {
        let store = store();
        settings::upsert_setting(&store, "color_mode", "dark").unwrap();
        assert_eq!(
            settings::get_setting(&store, "color_mode").unwrap().value,
            "dark"
        );

        settings::upsert_setting(&store, "color_mode", "light").unwrap();
        assert_eq!(
            settings::get_setting(&store, "color_mode").unwrap().value,
            "light"
        );

        settings::delete_setting(&store, "color_mode").unwrap();
        assert!(matches!(
            settings::get_setting(&store, "color_mode"),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn bulk_upsert_applies_every_entry() {
        let store = store();
        let entries = [
            ("display_currency".to_string(), "USD".to_string()),
            ("color_mode".to_string(), "dark".to_string()),
        ]
        .into_iter()
        .collect();
        let all = settings::upsert_settings(&store, &entries).unwrap();
        assert_eq!(all.get("display_currency").map(String::as_str), Some("USD"));
        assert_eq!(all.get("color_mode").map(String::as_str), Some("dark"));
    }
}

mod transactions_flow {
    use super::*;

    #[test]
    fn create_rejects_unknown_platform() {
        let store = store();
        let result =
            transaction::create_transaction(&store, new_transaction(42, "2024-03-01T10:00:00"));
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
    }

    #[test]
    fn view_carries_derived_fields() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "0");
        let view = add_closed_transaction(
            &store,
            platform.id,
            "2024-03-01T10:00:00",
            "2024-03-03T14:30:00",
            "100",
        );
        assert_eq!(view.realized_profit, dec("100"));
        assert_eq!(view.holding_time.as_deref(), Some("2d4h30m"));
        assert_eq!(view.platform_name, "Binance");
        assert_eq!(view.platform_currency, Currency::USD);
    }

    #[test]
    fn batch_delete_requires_ids_and_reports_count() {
        let store = store();
        let platform = add_platform(&store, "Binance", Currency::USD, "0");
        let a = add_transaction(&store, platform.id, "2024-03-01T10:00:00", "0", "0");
        let b = add_transaction(&store, platform.id, "2024-03-02T10:00:00", "0", "0");

        assert!(matches!(
            transaction::batch_delete_transactions(&store, &[]),
            Err(LedgerError::Validation { .. })
        ));

        let deleted = transaction::batch_delete_transactions(
            &store,
            &[a.record.id.unwrap(), b.record.id.unwrap(), 9999],
        )
        .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_transactions(None).unwrap(), 0);
    }
}
