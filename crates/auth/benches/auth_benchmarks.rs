use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{DateTime, Duration, TimeZone, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use std::sync::Arc;
use tollgate_auth::{
    App, AuthConfig, HttpMethod, InboundRequest, PermissionEvaluator, PermissionRule, RateLimiter, RateLimits,
    RuleSubject, Signer, TokenService, User,
};
use tollgate_core::{AppId, InMemoryCache, UserId};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

fn acme() -> App {
    App::new(AppId::new("acme").unwrap(), "s3cr3t")
}

fn bench_tokens(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_tokens");
    let config = AuthConfig {
        one_session_per_user: false,
        ..AuthConfig::default()
    };
    let tokens = TokenService::new(&config);
    let app = acme();
    let mut user = User::new(app.id.clone(), UserId::new("u1").unwrap(), "fb:1");

    group.bench_function("issue", |b| {
        b.iter(|| tokens.issue(black_box(&app), Some(&mut user), now()).unwrap());
    });

    let issued = tokens.issue(&app, Some(&mut user), now()).unwrap();
    let key = TokenService::signing_key(&app, Some(&user));
    group.bench_function("validate", |b| {
        b.iter(|| tokens.validate(black_box(&issued.token), &key, now()));
    });

    group.finish();
}

fn bench_signatures(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_signatures");
    let signer = Signer::new(&AuthConfig::default());

    // Body size dominates: it is hashed on both sides.
    for size in [0usize, 1024, 64 * 1024] {
        let mut req = InboundRequest::new(Method::POST, "/documents/42")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .query_param("version", "3")
            .body(vec![7u8; size]);
        let signed = signer
            .sign("https://api.example.com", &req.parts(), "app:acme", "s3cr3t", now())
            .unwrap();
        signed.apply(&mut req.headers).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("verify", size), &req, |b, req| {
            b.iter(|| assert!(signer.verify(black_box(&req.parts()), "s3cr3t")));
        });
    }

    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()), RateLimits::new(u64::MAX, u64::MAX).with_per_day(u64::MAX));

    group.bench_function("is_allowed_same_hour", |b| {
        let mut t = now().timestamp_millis();
        b.iter(|| {
            t += 1;
            limiter.is_allowed("app:acme", black_box("u1"), t)
        });
    });

    group.bench_function("is_allowed_hour_rollover", |b| {
        let mut t = now();
        b.iter(|| {
            t += Duration::hours(1);
            limiter.is_allowed("app:acme", black_box("u2"), t.timestamp_millis())
        });
    });

    group.finish();
}

fn bench_permissions(c: &mut Criterion) {
    let mut group = c.benchmark_group("permissions");
    let evaluator = PermissionEvaluator::default();

    for rules in [1usize, 16, 128] {
        let mut app = acme();
        for i in 0..rules {
            app.grant(PermissionRule::new(format!("resource{i}/*"), RuleSubject::Any).methods([HttpMethod::Get]));
        }
        app.grant(PermissionRule::new("users/*", RuleSubject::Own));
        let user = User::new(app.id.clone(), UserId::new("u1").unwrap(), "fb:1");

        group.bench_with_input(BenchmarkId::new("last_rule_match", rules), &app, |b, app| {
            b.iter(|| evaluator.is_allowed(app, Some(&user), black_box("/users/u1"), HttpMethod::Put));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tokens,
    bench_signatures,
    bench_rate_limiter,
    bench_permissions
);
criterion_main!(benches);
