use sea_orm::sea_query::{Condition, Expr, Func, LikeExpr, Order as SortDirection};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{order, order_item, user, ItemStatus, PaymentStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryPage {
    pub orders: Vec<OrderWithItems>,
    pub current_page: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminSortBy {
    #[default]
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "totalAmount")]
    TotalAmount,
    #[serde(rename = "orderId")]
    OrderId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderQuery {
    pub page: Option<u64>,
    pub q: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub sort_by: AdminSortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderRow {
    #[serde(flatten)]
    pub order: OrderWithItems,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderPage {
    pub orders: Vec<AdminOrderRow>,
    pub current_page: u64,
    pub total_pages: u64,
    pub query: String,
    pub status: String,
    pub sort_by: AdminSortBy,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderDetail {
    pub order: OrderWithItems,
    pub customer: Option<user::Model>,
    pub available_statuses: Vec<ItemStatus>,
}

/// Read side of orders: customer history and the admin listing.
#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
    history_page_size: u64,
    admin_page_size: u64,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>, history_page_size: u64, admin_page_size: u64) -> Self {
        Self {
            db,
            history_page_size: history_page_size.max(1),
            admin_page_size: admin_page_size.max(1),
        }
    }

    /// Newest orders first.
    #[instrument(skip(self))]
    pub async fn history(&self, user_id: Uuid, page: u64) -> Result<OrderHistoryPage, ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, self.history_page_size);
        let total_pages = paginator.num_pages().await?.max(1);
        let current_page = page.clamp(1, total_pages);
        let orders = paginator.fetch_page(current_page - 1).await?;

        Ok(OrderHistoryPage {
            orders: self.with_items(orders).await?,
            current_page,
            total_pages,
        })
    }

    /// `None` when the order does not exist or belongs to someone else.
    #[instrument(skip(self))]
    pub async fn detail(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = order::Entity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        Ok(self.with_items(vec![order]).await?.pop())
    }

    #[instrument(skip(self))]
    pub async fn admin_list(&self, query: AdminOrderQuery) -> Result<AdminOrderPage, ServiceError> {
        let search = query.q.as_deref().map(str::trim).unwrap_or_default().to_string();
        let status_filter = query.status.as_deref().map(str::trim).unwrap_or_default().to_string();

        let mut select = order::Entity::find().find_also_related(user::Entity);

        if !search.is_empty() {
            let pattern = contains_pattern(&search.to_lowercase());
            let mut condition = Condition::any()
                .add(
                    Expr::expr(Func::lower(Expr::col((user::Entity, user::Column::Name))))
                        .like(LikeExpr::new(pattern.clone()).escape('\\')),
                )
                .add(
                    Expr::expr(Func::lower(Expr::col((user::Entity, user::Column::Email))))
                        .like(LikeExpr::new(pattern).escape('\\')),
                );
            if let Ok(number) = search.parse::<i64>() {
                condition = condition.add(order::Column::OrderNumber.eq(number));
            }
            select = select.filter(condition);
        }

        if !status_filter.is_empty() {
            let status = PaymentStatus::parse(&status_filter).ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown payment status {}", status_filter))
            })?;
            select = select.filter(order::Column::PaymentStatus.eq(status));
        }

        let direction = match query.sort_order {
            SortOrder::Asc => SortDirection::Asc,
            SortOrder::Desc => SortDirection::Desc,
        };
        select = match query.sort_by {
            AdminSortBy::Date => select.order_by(order::Column::CreatedAt, direction),
            AdminSortBy::TotalAmount => select.order_by(order::Column::TotalAmount, direction),
            AdminSortBy::OrderId => select.order_by(order::Column::OrderNumber, direction),
        };

        let paginator = select.paginate(&*self.db, self.admin_page_size);
        let total_pages = paginator.num_pages().await?.max(1);
        let current_page = query.page.unwrap_or(1).clamp(1, total_pages);
        let rows = paginator.fetch_page(current_page - 1).await?;

        let (orders, customers): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        let orders = self.with_items(orders).await?;
        let rows = orders
            .into_iter()
            .zip(customers)
            .map(|(order, customer)| AdminOrderRow {
                order,
                customer_name: customer.as_ref().map(|c| c.name.clone()),
                customer_email: customer.map(|c| c.email),
            })
            .collect();

        Ok(AdminOrderPage {
            orders: rows,
            current_page,
            total_pages,
            query: search,
            status: status_filter,
            sort_by: query.sort_by,
            sort_order: query.sort_order,
        })
    }

    #[instrument(skip(self))]
    pub async fn admin_detail(&self, order_id: Uuid) -> Result<AdminOrderDetail, ServiceError> {
        let (order, customer) = order::Entity::find_by_id(order_id)
            .find_also_related(user::Entity)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let order = self
            .with_items(vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(AdminOrderDetail {
            order,
            customer,
            available_statuses: ItemStatus::ADMIN_SETTABLE.to_vec(),
        })
    }

    async fn with_items(&self, orders: Vec<order::Model>) -> Result<Vec<OrderWithItems>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::OrderId)
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?;

        let mut by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect())
    }
}

/// `%needle%` with LIKE wildcards in the needle matched literally.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
