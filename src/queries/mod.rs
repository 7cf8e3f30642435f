//! View Queries
//!
//! Read-only parameterized fetchers over the denormalized view tables.
//! Parameters append SQL predicates conjunctively; an offset without a limit
//! still paginates correctly (the limit defaults to unlimited). Results are
//! plain JSON records.

use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::api::AppState;
use crate::error::{AppError, AppResult};

/// Common filter parameters for view queries
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewParams {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Read-side query service
#[derive(Debug, Clone)]
pub struct ViewQueries {
    pool: PgPool,
}

impl ViewQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Product list rows (payload plus id/version for optimistic checks)
    pub async fn product_list(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = entity_query("product_list");
        push_filter(&mut qb, " AND aggregate_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        push_filter(&mut qb, " AND slug = ", params.slug.as_deref());
        qb.push(" ORDER BY updated_at DESC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Single product row, failing with `not_found` when absent
    pub async fn product_detail(&self, product_id: &str) -> AppResult<Value> {
        let mut qb = entity_query("product_list");
        push_filter(&mut qb, " AND aggregate_id = ", Some(product_id));
        fetch_payloads(qb, &self.pool)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(product_id.to_string()))
    }

    /// Variant list rows, ordered by their position within the product
    pub async fn variant_list(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = QueryBuilder::new(
            "SELECT payload || jsonb_build_object('id', aggregate_id, 'version', version, 'position', position) \
             FROM variant_list WHERE 1=1",
        );
        push_filter(&mut qb, " AND aggregate_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        push_filter(&mut qb, " AND product_id = ", params.product_id.as_deref());
        qb.push(" ORDER BY position ASC NULLS LAST, updated_at DESC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Collection list rows
    pub async fn collection_list(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = entity_query("collection_list");
        push_filter(&mut qb, " AND aggregate_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        push_filter(&mut qb, " AND slug = ", params.slug.as_deref());
        qb.push(" ORDER BY updated_at DESC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Collection membership rows with position
    pub async fn collection_products(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = QueryBuilder::new(
            "SELECT jsonb_build_object('collectionId', collection_id, 'productId', product_id, 'position', position) \
             FROM collection_products WHERE 1=1",
        );
        push_filter(&mut qb, " AND collection_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND product_id = ", params.product_id.as_deref());
        qb.push(" ORDER BY position ASC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Slug reservation / redirect rows
    pub async fn slug_redirects(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = QueryBuilder::new(
            "SELECT jsonb_build_object(
                'slug', slug, 'entityId', entity_id, 'entityType', entity_type,
                'status', status, 'newSlug', new_slug, 'createdAt', created_at
             ) FROM slug_redirects WHERE 1=1",
        );
        push_filter(&mut qb, " AND slug = ", params.slug.as_deref());
        push_filter(&mut qb, " AND entity_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        qb.push(" ORDER BY created_at ASC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Schedule rows
    pub async fn schedule_list(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = entity_query("schedule_list");
        push_filter(&mut qb, " AND aggregate_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        push_filter(&mut qb, " AND target_aggregate_id = ", params.product_id.as_deref());
        qb.push(" ORDER BY scheduled_for ASC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Fulfillment rows
    pub async fn fulfillment_list(&self, params: &ViewParams) -> AppResult<Vec<Value>> {
        let mut qb = entity_query("fulfillment_list");
        push_filter(&mut qb, " AND aggregate_id = ", params.entity_id.as_deref());
        push_filter(&mut qb, " AND status = ", params.status.as_deref());
        qb.push(" ORDER BY updated_at DESC");
        push_page(&mut qb, params);
        fetch_payloads(qb, &self.pool).await
    }

    /// Published catalogue entry by slug
    pub async fn published_product(&self, slug: &str) -> AppResult<Value> {
        let row: Option<(Value,)> = sqlx::query_as(
            r#"
            SELECT payload || jsonb_build_object('slug', slug, 'publishedAt', published_at)
            FROM published_products
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(v,)| v)
            .ok_or_else(|| AppError::NotFound(slug.to_string()))
    }
}

fn entity_query(table: &str) -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!(
        "SELECT payload || jsonb_build_object('id', aggregate_id, 'version', version) FROM {} WHERE 1=1",
        table
    ))
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, predicate: &str, value: Option<&str>) {
    if let Some(value) = value {
        qb.push(predicate).push_bind(value.to_string());
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, params: &ViewParams) {
    if let Some(limit) = params.limit {
        qb.push(" LIMIT ").push_bind(limit.max(0));
    }
    if let Some(offset) = params.offset {
        qb.push(" OFFSET ").push_bind(offset.max(0));
    }
}

async fn fetch_payloads(
    mut qb: QueryBuilder<'_, Postgres>,
    pool: &PgPool,
) -> AppResult<Vec<Value>> {
    let rows: Vec<(Value,)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

/// Execute a view query by its ingress `type` string.
pub async fn dispatch_query(
    state: &AppState,
    kind: &str,
    params: Value,
) -> AppResult<Value> {
    let params: ViewParams = if params.is_null() {
        ViewParams::default()
    } else {
        serde_json::from_value(params)
            .map_err(|e| AppError::Validation(format!("invalid params: {}", e)))?
    };
    let queries = ViewQueries::new(state.pool.clone());

    let data = match kind {
        "productList" => json!(queries.product_list(&params).await?),
        "productDetail" => {
            let id = params
                .entity_id
                .as_deref()
                .ok_or_else(|| AppError::Validation("entityId is required".to_string()))?;
            queries.product_detail(id).await?
        }
        "variantList" => json!(queries.variant_list(&params).await?),
        "collectionList" => json!(queries.collection_list(&params).await?),
        "collectionProducts" => json!(queries.collection_products(&params).await?),
        "slugRedirects" => json!(queries.slug_redirects(&params).await?),
        "scheduleList" => json!(queries.schedule_list(&params).await?),
        "fulfillmentList" => json!(queries.fulfillment_list(&params).await?),
        "publishedProduct" => {
            let slug = params
                .slug
                .as_deref()
                .ok_or_else(|| AppError::Validation("slug is required".to_string()))?;
            queries.published_product(slug).await?
        }
        other => {
            return Err(AppError::Validation(format!("unknown query type: {}", other)));
        }
    };

    Ok(data)
}
