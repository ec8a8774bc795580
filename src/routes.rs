use crate::{api::payroll, auth::middleware::auth_middleware, config::Config};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

const WORKBOOK_LIMIT_BYTES: usize = 16 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-scope limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let per_ms = if requests_per_min == 0 {
            1
        } else {
            (60_000 / requests_per_min as u64).max(1)
        };
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min.max(1))
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .expect("rate limiter settings are non-zero");
        Governor::new(&cfg)
    }

    let protected_limiter = build_limiter(config.rate_protected_per_min);

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/payroll")
                    // /payroll/periods
                    .service(
                        web::resource("/periods")
                            .route(web::post().to(payroll::create_period))
                            .route(web::get().to(payroll::list_periods)),
                    )
                    // /payroll/periods/{id}
                    .service(web::resource("/periods/{id}").route(web::get().to(payroll::get_period)))
                    .service(
                        web::resource("/periods/{id}/recalculate")
                            .route(web::post().to(payroll::recalculate_period)),
                    )
                    .service(
                        web::resource("/periods/{id}/approve")
                            .route(web::put().to(payroll::approve)),
                    )
                    .service(web::resource("/periods/{id}/send").route(web::put().to(payroll::send)))
                    .service(
                        web::resource("/periods/{id}/sent")
                            .route(web::put().to(payroll::mark_sent)),
                    )
                    .service(web::resource("/periods/{id}/lock").route(web::put().to(payroll::lock)))
                    .service(
                        web::resource("/periods/{id}/inputs")
                            .route(web::put().to(payroll::update_input)),
                    )
                    .service(
                        web::resource("/periods/{id}/expenses")
                            .route(web::post().to(payroll::add_expense)),
                    )
                    // /payroll/backfill
                    .service(
                        web::resource("/backfill")
                            .app_data(web::PayloadConfig::new(WORKBOOK_LIMIT_BYTES))
                            .route(web::post().to(payroll::backfill)),
                    )
                    // /payroll/identities
                    .service(
                        web::resource("/identities")
                            .route(web::get().to(payroll::list_identities)),
                    )
                    .service(
                        web::resource("/identities/resolve")
                            .route(web::put().to(payroll::resolve_identity)),
                    ),
            ),
    );
}
