//! Paginated, filtered and sorted wish listings.
//!
//! The repository narrows by owner, visibility and status; search and sorting
//! run on revealed content so encrypted names stay searchable for viewers
//! allowed to read them.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::{
        user::UserSummary,
        wish::{Show, Wish, WishContent, WishView},
    },
    services::{
        visibility::{Access, visible_shows},
        wishes::require_user,
    },
    state::AppState,
    storage::WishFilter,
};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Fulfilled,
    Unfulfilled,
}

impl StatusFilter {
    fn executed(self) -> Option<bool> {
        match self {
            StatusFilter::All => None,
            StatusFilter::Fulfilled => Some(true),
            StatusFilter::Unfulfilled => Some(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    SortByLikes,
    Price,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub const NEWEST: SortSpec = SortSpec {
        field: SortField::CreatedAt,
        direction: SortDirection::Desc,
    };

    pub const MOST_LIKED: SortSpec = SortSpec {
        field: SortField::SortByLikes,
        direction: SortDirection::Desc,
    };
}

impl FromStr for SortSpec {
    type Err = AppError;

    /// Parses `field:direction`, e.g. `price:asc`. The direction defaults to `desc`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (field, direction) = raw.split_once(':').unwrap_or((raw, "desc"));

        let field = match field {
            "createdAt" => SortField::CreatedAt,
            "updatedAt" => SortField::UpdatedAt,
            "sortByLikes" => SortField::SortByLikes,
            "price" => SortField::Price,
            "name" => SortField::Name,
            other => return Err(AppError::BadRequest(format!("Cannot sort by '{}'", other))),
        };
        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(AppError::BadRequest(format!("Unknown sort direction '{}'", other)));
            }
        };

        Ok(Self { field, direction })
    }
}

/// Query string of the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WishListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<StatusFilter>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WishListQuery {
    pub page: u32,
    pub limit: u32,
    pub status: StatusFilter,
    pub search: Option<String>,
    pub sort: SortSpec,
}

impl WishListParams {
    pub fn into_query(self, default_sort: SortSpec) -> Result<WishListQuery, AppError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::BadRequest("Pages start at 1".to_string()));
        }
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            return Err(AppError::BadRequest("Limit must be positive".to_string()));
        }

        Ok(WishListQuery {
            page,
            limit: limit.min(MAX_LIMIT),
            status: self.status.unwrap_or_default(),
            search: self
                .search
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            sort: self.sort.as_deref().map(str::parse::<SortSpec>).transpose()?.unwrap_or(default_sort),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WishListResponse {
    pub items: Vec<WishView>,
    pub creator: Option<UserSummary>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

/// A wish together with its revealed content.
#[derive(Debug, Clone)]
pub struct Listed {
    pub wish: Wish,
    pub content: WishContent,
}

fn compare(a: &Listed, b: &Listed, field: SortField) -> Ordering {
    match field {
        SortField::CreatedAt => a.wish.created_at.cmp(&b.wish.created_at),
        SortField::UpdatedAt => a.wish.updated_at.cmp(&b.wish.updated_at),
        SortField::SortByLikes => a.wish.sort_by_likes.cmp(&b.wish.sort_by_likes),
        SortField::Price => {
            let price = |l: &Listed| l.content.price.as_ref().map(|p| p.value());
            price(a).partial_cmp(&price(b)).unwrap_or(Ordering::Equal)
        }
        SortField::Name => a.content.name.to_lowercase().cmp(&b.content.name.to_lowercase()),
    }
}

/// Applies search, sort and pagination. Returns the total match count and
/// the requested page.
pub fn arrange(entries: Vec<Listed>, query: &WishListQuery) -> (usize, Vec<Listed>) {
    let mut matching: Vec<Listed> = match &query.search {
        Some(term) => entries
            .into_iter()
            .filter(|l| {
                l.content.name.to_lowercase().contains(term)
                    || l.content.description.to_lowercase().contains(term)
            })
            .collect(),
        None => entries,
    };

    matching.sort_by(|a, b| {
        let primary = compare(a, b, query.sort.field);
        let primary = match query.sort.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| b.wish.updated_at.cmp(&a.wish.updated_at))
    });

    let total = matching.len();
    let skip = (query.page as usize - 1).saturating_mul(query.limit as usize);
    let page = matching.into_iter().skip(skip).take(query.limit as usize).collect();
    (total, page)
}

async fn run(state: &AppState, filter: WishFilter, query: &WishListQuery) -> Result<(usize, Vec<WishView>), AppError> {
    let wishes = state.wishes.find_wishes(&filter).await?;

    let mut entries = Vec::with_capacity(wishes.len());
    for wish in wishes {
        let content = wish.reveal(&state.cipher)?;
        entries.push(Listed { wish, content });
    }

    let (total, page) = arrange(entries, query);
    // Every listed wish passed the visibility filter, so its fields may be shown.
    let items = page
        .iter()
        .map(|l| WishView::build(&l.wish, Access::full(), &state.cipher))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((total, items))
}

/// Wishes of `owner_id` that `viewer_id` may see.
pub async fn list_wishes(
    state: &AppState,
    viewer_id: i64,
    owner_id: i64,
    query: WishListQuery,
) -> Result<WishListResponse, AppError> {
    let owner = require_user(state, owner_id).await?;

    let filter = WishFilter {
        owner_id: Some(owner.id),
        shows: visible_shows(owner.id, viewer_id, &owner.friends),
        executed: query.status.executed(),
    };
    let (total, items) = run(state, filter, &query).await?;

    Ok(WishListResponse {
        items,
        creator: Some(UserSummary::from(&owner)),
        total,
        page: query.page,
        limit: query.limit,
    })
}

/// Public wishes of every user.
pub async fn feed(state: &AppState, query: WishListQuery) -> Result<WishListResponse, AppError> {
    let filter = WishFilter {
        owner_id: None,
        shows: vec![Show::All],
        executed: query.status.executed(),
    };
    let (total, items) = run(state, filter, &query).await?;

    Ok(WishListResponse {
        items,
        creator: None,
        total,
        page: query.page,
        limit: query.limit,
    })
}
