//! Request orchestration.
//!
//! A data request resolves in this order: complete cache entry, server
//! capabilities (version and binary support), dataset metadata, then either
//! one direct request or a set of chunk requests that are reassembled and
//! trimmed. Every direct request, including each chunk, goes through the
//! same cached path.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use hapi_codec::{
    compile_layout, decode, read_snapshot, write_snapshot, ColumnarResult, DecodeStrategy, Encoding,
    FieldLayout,
};
use hapi_common::{
    parse_time, Capabilities, Catalog, DatasetMetadata, HapiError, HapiResult, Provenance,
};

use crate::cache::{partial_path, read_if_present, write_file, CacheLayout, RequestPaths};
use crate::chunking::{self, request_time, ChunkInterval, ChunkUnit};
use crate::options::{RequestOptions, Transfer};
use crate::request::{capabilities_url, catalog_url, info_url, DataRequest};
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

/// What the client needs to know about a server to issue data requests.
#[derive(Debug, Clone, Copy)]
struct ServerProfile {
    hapi_major: u32,
    encoding: Encoding,
}

/// Everything shared by the direct requests making up one `fetch`.
#[derive(Clone)]
struct RequestContext<'a> {
    cache: CacheLayout,
    profile: ServerProfile,
    layout: FieldLayout,
    strategy: DecodeStrategy,
    opts: &'a RequestOptions,
}

/// Outcome of one direct data request.
struct Fetched {
    result: ColumnarResult,
    paths: RequestPaths,
    url: Option<String>,
    from_cache: bool,
    download_secs: f64,
    read_secs: f64,
}

/// How a data request is served.
enum Plan {
    Direct,
    /// Measuring the cadence already fetched the whole request.
    Fetched(Fetched),
    Chunks(Vec<ChunkInterval>),
}

/// What a cadence measurement found.
enum CadenceWindow {
    Measured(Option<Duration>),
    /// The window grew to cover the whole request.
    Covered(Fetched),
}

/// HAPI client over a [`Transport`].
#[derive(Clone)]
pub struct HapiClient {
    transport: Arc<dyn Transport>,
}

impl HapiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Client over the default HTTP transport.
    pub fn http(config: HttpTransportConfig) -> HapiResult<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// The server's `/capabilities` document.
    #[instrument(skip(self, opts))]
    pub async fn fetch_capabilities(
        &self,
        server: &str,
        opts: &RequestOptions,
    ) -> HapiResult<Capabilities> {
        let cache = CacheLayout::new(&opts.cache_dir);
        self.cached_document(
            &capabilities_url(server),
            &cache.capabilities_path(server),
            opts,
            Capabilities::from_json,
        )
        .await
    }

    /// The server's `/catalog` document.
    #[instrument(skip(self, opts))]
    pub async fn fetch_catalog(&self, server: &str, opts: &RequestOptions) -> HapiResult<Catalog> {
        let cache = CacheLayout::new(&opts.cache_dir);
        self.cached_document(
            &catalog_url(server),
            &cache.catalog_path(server),
            opts,
            Catalog::from_json,
        )
        .await
    }

    /// Full `/info` metadata for a dataset.
    #[instrument(skip(self, opts))]
    pub async fn fetch_metadata(
        &self,
        server: &str,
        dataset: &str,
        opts: &RequestOptions,
    ) -> HapiResult<DatasetMetadata> {
        let caps = self.fetch_capabilities(server, opts).await?;
        self.fetch_info(server, dataset, caps.hapi_major(), opts).await
    }

    /// Fetch `parameters` of `dataset` over `[start, stop)`.
    ///
    /// `parameters` is a comma-separated list in dataset order; empty
    /// selects all. The returned metadata describes exactly the returned
    /// columns and carries the request's provenance.
    #[instrument(skip(self, opts), fields(server = %server, dataset = %dataset))]
    pub async fn fetch(
        &self,
        server: &str,
        dataset: &str,
        parameters: &str,
        start: &str,
        stop: &str,
        opts: &RequestOptions,
    ) -> HapiResult<(ColumnarResult, DatasetMetadata)> {
        opts.validate()?;
        let started = Instant::now();
        let request = DataRequest::new(server, dataset, parameters, start, stop);
        let (t_start, t_stop) = request_range(&request)?;
        let cache = CacheLayout::new(&opts.cache_dir);

        if opts.use_cache {
            if let Some((result, mut meta)) = read_cached_result(&cache, &request, opts).await? {
                meta.provenance.from_cache = Some(true);
                meta.provenance.total_time = Some(started.elapsed().as_secs_f64());
                info!(records = result.len(), "Served from cache");
                return Ok((result, meta));
            }
        }

        let profile = self.server_profile(&request.server, opts).await?;
        let info = self
            .fetch_info(&request.server, dataset, profile.hapi_major, opts)
            .await?;
        let mut meta = info.subset(&request.parameters)?;
        let (layout, strategy) = compile_layout(&meta, profile.encoding)?;

        let ctx = RequestContext {
            cache,
            profile,
            layout,
            strategy,
            opts,
        };

        let plan = if opts.chunking_requested() {
            self.plan(&ctx, &request, &meta, t_start, t_stop).await?
        } else {
            Plan::Direct
        };

        let paths = ctx.cache.request_paths(&request, profile.encoding);
        let mut provenance = Provenance {
            server: Some(request.server.clone()),
            dataset: Some(request.dataset.clone()),
            parameters: Some(request.parameter_string()),
            time_min: Some(request.start.clone()),
            time_max: Some(request.stop.clone()),
            request_date: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            format: Some(profile.encoding.to_string()),
            cache_dir: Some(opts.cache_dir.display().to_string()),
            ..Default::default()
        };

        let result = match plan {
            Plan::Chunks(plan) => {
                let result = self.fetch_chunks(&ctx, &request, &plan).await?;
                if opts.write_cache {
                    write_file(&paths.snapshot, &write_snapshot(&result)?).await?;
                }
                provenance.chunks = Some(plan.len());
                provenance.from_cache = Some(false);
                result
            }
            Plan::Direct => {
                let fetched = self.fetch_direct(&ctx, &request).await?;
                direct_result(fetched, opts.write_cache, &mut provenance)
            }
            Plan::Fetched(fetched) => direct_result(fetched, opts.write_cache, &mut provenance),
        };

        if opts.write_cache {
            provenance.meta_file = Some(paths.meta.display().to_string());
            provenance.data_file_parsed = Some(paths.snapshot.display().to_string());
        }
        provenance.total_time = Some(started.elapsed().as_secs_f64());
        meta.provenance = provenance;

        if opts.write_cache {
            write_file(&paths.meta, &serde_json::to_vec_pretty(&meta)?).await?;
        }

        info!(
            records = result.len(),
            chunks = ?meta.provenance.chunks,
            elapsed_secs = format!("{:.3}", started.elapsed().as_secs_f64()),
            "Fetch complete"
        );
        Ok((result, meta))
    }

    async fn cached_document<T>(
        &self,
        url: &str,
        path: &Path,
        opts: &RequestOptions,
        parse: fn(&[u8]) -> HapiResult<T>,
    ) -> HapiResult<T> {
        if opts.use_cache {
            if let Some(body) = read_if_present(path).await? {
                return parse(&body);
            }
        }

        let doc = self.transport.get_json(url).await?;
        let body = serde_json::to_vec_pretty(&doc)?;
        let parsed = parse(&body)?;
        if opts.write_cache {
            write_file(path, &body).await?;
        }
        Ok(parsed)
    }

    async fn fetch_info(
        &self,
        server: &str,
        dataset: &str,
        hapi_major: u32,
        opts: &RequestOptions,
    ) -> HapiResult<DatasetMetadata> {
        let cache = CacheLayout::new(&opts.cache_dir);
        self.cached_document(
            &info_url(server, dataset, hapi_major),
            &cache.info_path(server, dataset),
            opts,
            DatasetMetadata::from_json,
        )
        .await
    }

    /// HAPI version and the encoding to request from `server`.
    async fn server_profile(
        &self,
        server: &str,
        opts: &RequestOptions,
    ) -> HapiResult<ServerProfile> {
        let caps = self.fetch_capabilities(server, opts).await?;
        let encoding = match opts.format {
            Encoding::Binary if caps.supports("binary") => Encoding::Binary,
            Encoding::Binary => {
                warn!(server = %server, "Server does not offer binary, falling back to CSV");
                Encoding::Csv
            }
            Encoding::Csv => Encoding::Csv,
        };
        Ok(ServerProfile {
            hapi_major: caps.hapi_major(),
            encoding,
        })
    }

    /// One request to `/data`, served from the cached snapshot when allowed.
    async fn fetch_direct(
        &self,
        ctx: &RequestContext<'_>,
        request: &DataRequest,
    ) -> HapiResult<Fetched> {
        let paths = ctx.cache.request_paths(request, ctx.profile.encoding);

        if ctx.opts.use_cache {
            if let Some(snapshot) = read_if_present(&paths.snapshot).await? {
                let read_started = Instant::now();
                let result = read_snapshot(&snapshot)?;
                return Ok(Fetched {
                    result,
                    paths,
                    url: None,
                    from_cache: true,
                    download_secs: 0.0,
                    read_secs: read_started.elapsed().as_secs_f64(),
                });
            }
        }

        let url = request.data_url(ctx.profile.hapi_major, ctx.profile.encoding);
        debug!(url = %url, "Requesting data");

        let download_started = Instant::now();
        let body: Bytes = match ctx.opts.transfer {
            Transfer::Memory => {
                let body = self.transport.get_bytes(&url).await?;
                if ctx.opts.write_cache {
                    write_file(&paths.raw, &body).await?;
                }
                body
            }
            Transfer::File => {
                if let Some(parent) = paths.raw.parent() {
                    fs::create_dir_all(parent).await?;
                }
                let partial = partial_path(&paths.raw);
                if let Err(e) = self.transport.download_to(&url, &partial).await {
                    // The transport may have written part of the body
                    fs::remove_file(&partial).await.ok();
                    return Err(e);
                }
                fs::rename(&partial, &paths.raw).await?;
                let body = fs::read(&paths.raw).await?;
                if !ctx.opts.write_cache {
                    fs::remove_file(&paths.raw).await?;
                }
                Bytes::from(body)
            }
        };
        let download_secs = download_started.elapsed().as_secs_f64();

        let read_started = Instant::now();
        let result = decode(&body, &ctx.layout, ctx.profile.encoding, ctx.strategy)?;
        let read_secs = read_started.elapsed().as_secs_f64();

        if ctx.opts.write_cache {
            write_file(&paths.snapshot, &write_snapshot(&result)?).await?;
        }

        debug!(
            records = result.len(),
            bytes = body.len(),
            "Decoded data response"
        );
        Ok(Fetched {
            result,
            paths,
            url: Some(url),
            from_cache: false,
            download_secs,
            read_secs,
        })
    }

    /// Chunk plan for a request, or a direct fetch.
    async fn plan(
        &self,
        ctx: &RequestContext<'_>,
        request: &DataRequest,
        meta: &DatasetMetadata,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> HapiResult<Plan> {
        if let Some(n) = ctx.opts.n_chunks {
            return chunking::plan_n_chunks(start, stop, n).map(Plan::Chunks);
        }

        let unit = match ctx.opts.dt_chunk.and_then(|size| size.unit()) {
            Some(unit) => unit,
            None => {
                let cadence = match meta.cadence()? {
                    Some(c) if !c.is_zero() => Some(c.approx()),
                    _ => match self.measure_cadence(ctx, request, start, stop).await? {
                        CadenceWindow::Measured(cadence) => cadence,
                        CadenceWindow::Covered(fetched) => return Ok(Plan::Fetched(fetched)),
                    },
                };
                let Some(cadence) = cadence else {
                    debug!("Cadence unknown, not chunking");
                    return Ok(Plan::Direct);
                };
                let unit = ChunkUnit::for_cadence(cadence);
                if !chunking::should_chunk(start, stop, unit, ctx.opts.chunk_threshold) {
                    debug!(unit = ?unit, "Request shorter than chunk threshold, not chunking");
                    return Ok(Plan::Direct);
                }
                unit
            }
        };

        chunking::plan_chunks(start, stop, unit).map(Plan::Chunks)
    }

    /// Estimate the cadence from a growing window at the start of the request.
    ///
    /// Once the window reaches `stop` the whole request is fetched through the
    /// normal cached path and handed back instead of an estimate.
    async fn measure_cadence(
        &self,
        ctx: &RequestContext<'_>,
        request: &DataRequest,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> HapiResult<CadenceWindow> {
        let window_opts = RequestOptions {
            write_cache: false,
            ..ctx.opts.clone()
        };
        let window_ctx = RequestContext {
            opts: &window_opts,
            ..ctx.clone()
        };

        let mut window = Duration::hours(1);
        loop {
            let window_stop = match start.checked_add_signed(window) {
                Some(t) if t < stop => t,
                _ => {
                    debug!("Cadence window covers the request, fetching directly");
                    return self.fetch_direct(ctx, request).await.map(CadenceWindow::Covered);
                }
            };
            let sample = request.with_range(&request.start, &request_time(&window_stop));
            let fetched = self.fetch_direct(&window_ctx, &sample).await?;
            let records = fetched.result.len();

            if records >= ctx.opts.cadence_min_records {
                let cadence = chunking::mean_spacing(fetched.result.times().unwrap_or_default())?;
                debug!(records, cadence = ?cadence, "Measured cadence");
                return Ok(CadenceWindow::Measured(cadence));
            }
            window = window * 2;
        }
    }

    async fn fetch_chunks(
        &self,
        ctx: &RequestContext<'_>,
        request: &DataRequest,
        plan: &[ChunkInterval],
    ) -> HapiResult<ColumnarResult> {
        let concurrency = if ctx.opts.parallel {
            ctx.opts.n_parallel
        } else {
            1
        };
        info!(chunks = plan.len(), concurrency, "Fetching in chunks");

        let parts = chunking::execute(plan, concurrency, move |index, interval| {
            let sub = request.with_range(&interval.start_str(), &interval.stop_str());
            async move {
                debug!(chunk = index, start = %sub.start, stop = %sub.stop, "Fetching chunk");
                self.fetch_direct(ctx, &sub).await.map(|fetched| fetched.result)
            }
        })
        .await?;

        chunking::reassemble(parts, &request.start, &request.stop)
    }
}

/// Record a direct fetch in `provenance` and hand back its result.
fn direct_result(fetched: Fetched, write_cache: bool, provenance: &mut Provenance) -> ColumnarResult {
    if write_cache && !fetched.from_cache {
        provenance.data_file = Some(fetched.paths.raw.display().to_string());
    }
    provenance.request_url = fetched.url;
    provenance.from_cache = Some(fetched.from_cache);
    provenance.download_time = Some(fetched.download_secs);
    provenance.read_time = Some(fetched.read_secs);
    fetched.result
}

/// Parse and check the request's time range.
fn request_range(request: &DataRequest) -> HapiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start = parse_time(&request.start)?;
    let stop = parse_time(&request.stop)?;
    if start >= stop {
        return Err(HapiError::InvalidTime(format!(
            "start {} is not before stop {}",
            request.start, request.stop
        )));
    }
    Ok((start, stop))
}

/// A complete cached result (snapshot and metadata) for `request`, if any.
async fn read_cached_result(
    cache: &CacheLayout,
    request: &DataRequest,
    opts: &RequestOptions,
) -> HapiResult<Option<(ColumnarResult, DatasetMetadata)>> {
    let paths = cache.request_paths(request, opts.format);
    let Some(meta) = read_if_present(&paths.meta).await? else {
        return Ok(None);
    };
    let Some(snapshot) = read_if_present(&paths.snapshot).await? else {
        return Ok(None);
    };
    let meta = DatasetMetadata::from_json(&meta)?;
    let result = read_snapshot(&snapshot)?;
    debug!(path = %paths.snapshot.display(), "Complete cache entry found");
    Ok(Some((result, meta)))
}
