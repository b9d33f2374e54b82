// src/models/wish.rs

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    error::AppError,
    models::user::User,
    services::visibility::Access,
    utils::{crypto::Cipher, html::clean_html},
};

const MAX_ADDRESSES: usize = 10;

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,12}(\.\d{1,2})?$").expect("valid amount regex"));

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\p{L}\p{N}\s\-_.,!?'"()&:;#+/№%]+$"#).expect("valid name regex")
});

/// Visibility policy shared by wishes and profile fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Show {
    #[default]
    All,
    Friends,
    Nobody,
}

impl Show {
    pub fn as_str(&self) -> &'static str {
        match self {
            Show::All => "all",
            Show::Friends => "friends",
            Show::Nobody => "nobody",
        }
    }

    /// Restricted fields are stored in plaintext only for public wishes.
    pub fn is_public(&self) -> bool {
        matches!(self, Show::All)
    }
}

impl FromStr for Show {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "all" => Ok(Show::All),
            "friends" => Ok(Show::Friends),
            "nobody" => Ok(Show::Nobody),
            other => Err(AppError::BadRequest(format!("Unknown visibility '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Uah,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Uah => "UAH",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

impl FromStr for Currency {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "UAH" => Ok(Currency::Uah),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(AppError::BadRequest(format!("Unknown currency '{}'", other))),
        }
    }
}

/// A non-negative price with at most two fractional digits, kept in its decimal text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(String);

impl Amount {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if !AMOUNT_RE.is_match(trimmed) {
            return Err(AppError::BadRequest(format!("Invalid price '{}'", raw)));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> f64 {
        self.0.parse().unwrap_or(0.0)
    }
}

impl TryFrom<String> for Amount {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Amount::parse(&raw)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value that can live in a restricted (possibly encrypted) column.
pub trait SealedValue: Sized + Clone {
    fn to_plain(&self) -> String;
    fn from_plain(raw: &str) -> Result<Self, AppError>;
}

impl SealedValue for String {
    fn to_plain(&self) -> String {
        self.clone()
    }

    fn from_plain(raw: &str) -> Result<Self, AppError> {
        Ok(raw.to_string())
    }
}

impl SealedValue for Amount {
    fn to_plain(&self) -> String {
        self.0.clone()
    }

    fn from_plain(raw: &str) -> Result<Self, AppError> {
        Amount::parse(raw)
            .map_err(|_| AppError::InternalServerError("Stored price is corrupt".to_string()))
    }
}

impl SealedValue for Currency {
    fn to_plain(&self) -> String {
        self.as_str().to_string()
    }

    fn from_plain(raw: &str) -> Result<Self, AppError> {
        raw.parse()
            .map_err(|_| AppError::InternalServerError("Stored currency is corrupt".to_string()))
    }
}

/// A restricted field as it exists at rest: plaintext for public wishes,
/// ciphertext otherwise. Callers have to go through [`Sealed::reveal`] to get a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Sealed<T> {
    Plain(T),
    Encrypted(String),
}

impl<T: SealedValue> Sealed<T> {
    pub fn seal(value: T, show: Show, cipher: &Cipher) -> Result<Self, AppError> {
        if show.is_public() {
            Ok(Sealed::Plain(value))
        } else {
            Ok(Sealed::Encrypted(cipher.encrypt(&value.to_plain())?))
        }
    }

    pub fn reveal(&self, cipher: &Cipher) -> Result<T, AppError> {
        match self {
            Sealed::Plain(value) => Ok(value.clone()),
            Sealed::Encrypted(ciphertext) => T::from_plain(&cipher.decrypt(ciphertext)),
        }
    }

    /// Column representation.
    pub fn to_stored(&self) -> String {
        match self {
            Sealed::Plain(value) => value.to_plain(),
            Sealed::Encrypted(ciphertext) => ciphertext.clone(),
        }
    }

    /// Rebuilds the field from its column; the wish's `show` decides which form it is in.
    pub fn from_stored(raw: &str, show: Show) -> Result<Self, AppError> {
        if show.is_public() {
            Ok(Sealed::Plain(T::from_plain(raw)?))
        } else {
            Ok(Sealed::Encrypted(raw.to_string()))
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Sealed::Encrypted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct WishAddress {
    #[serde(default)]
    pub id: String,
    #[validate(length(min = 1, max = 500, message = "Address must be between 1 and 500 characters"))]
    pub value: String,
}

/// Image entry as persisted (path possibly encrypted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub path: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WishImage {
    pub path: Sealed<String>,
    pub position: u32,
}

/// Plaintext image slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSlot {
    pub path: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub user_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Snapshot of the reacting user taken at reaction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: i64,
    pub user_avatar: Option<String>,
    pub user_full_name: String,
}

impl Reaction {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            user_avatar: user.avatar.clone(),
            user_full_name: user.full_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Dislike,
}

/// Owner-editable fields in plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct WishContent {
    pub material: bool,
    pub show: Show,
    pub name: String,
    pub price: Option<Amount>,
    pub currency: Option<Currency>,
    pub addresses: Vec<WishAddress>,
    pub description: String,
    pub images: Vec<ImageSlot>,
}

/// A wish in its at-rest form.
#[derive(Debug, Clone, PartialEq)]
pub struct Wish {
    pub id: i64,
    pub user_id: i64,
    pub material: bool,
    pub show: Show,
    pub name: Sealed<String>,
    pub price: Option<Sealed<Amount>>,
    pub currency: Option<Sealed<Currency>>,
    pub addresses: Vec<WishAddress>,
    pub description: String,
    pub executed: bool,
    pub images: Vec<WishImage>,
    pub booking: Option<Booking>,
    pub likes: Vec<Reaction>,
    pub dislikes: Vec<Reaction>,
    pub sort_by_likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wish {
    /// Unsaved wish (id 0) for `owner_id`, sealed according to `content.show`.
    pub fn draft(owner_id: i64, content: WishContent, cipher: &Cipher) -> Result<Self, AppError> {
        let now = Utc::now();
        let mut wish = Wish {
            id: 0,
            user_id: owner_id,
            material: false,
            show: Show::All,
            name: Sealed::Plain(String::new()),
            price: None,
            currency: None,
            addresses: Vec::new(),
            description: String::new(),
            executed: false,
            images: Vec::new(),
            booking: None,
            likes: Vec::new(),
            dislikes: Vec::new(),
            sort_by_likes: 0,
            created_at: now,
            updated_at: now,
        };
        wish.set_content(content, cipher)?;
        Ok(wish)
    }

    pub fn reveal(&self, cipher: &Cipher) -> Result<WishContent, AppError> {
        let mut images = Vec::with_capacity(self.images.len());
        for image in &self.images {
            images.push(ImageSlot {
                path: image.path.reveal(cipher)?,
                position: image.position,
            });
        }

        Ok(WishContent {
            material: self.material,
            show: self.show,
            name: self.name.reveal(cipher)?,
            price: self.price.as_ref().map(|p| p.reveal(cipher)).transpose()?,
            currency: self.currency.as_ref().map(|c| c.reveal(cipher)).transpose()?,
            addresses: self.addresses.clone(),
            description: self.description.clone(),
            images,
        })
    }

    /// Replaces the editable fields, sealing every restricted one for `content.show`.
    /// This is the only place where restricted fields are written, so the
    /// encryption state always matches `show`.
    pub fn set_content(&mut self, content: WishContent, cipher: &Cipher) -> Result<(), AppError> {
        let show = content.show;
        let mut images = Vec::with_capacity(content.images.len());
        for image in content.images {
            images.push(WishImage {
                path: Sealed::seal(image.path, show, cipher)?,
                position: image.position,
            });
        }

        self.material = content.material;
        self.show = show;
        self.name = Sealed::seal(content.name, show, cipher)?;
        self.price = content
            .price
            .map(|p| Sealed::seal(p, show, cipher))
            .transpose()?;
        self.currency = content
            .currency
            .map(|c| Sealed::seal(c, show, cipher))
            .transpose()?;
        self.addresses = content.addresses;
        self.description = content.description;
        self.images = images;
        Ok(())
    }

    /// Converts the restricted fields for a new visibility.
    pub fn reseal(&mut self, show: Show, cipher: &Cipher) -> Result<(), AppError> {
        let mut content = self.reveal(cipher)?;
        content.show = show;
        self.set_content(content, cipher)
    }

    /// Toggles a reaction. Returns whether the reaction is active afterwards.
    /// A user is in at most one of `likes` / `dislikes`.
    pub fn apply_reaction(&mut self, reaction: Reaction, kind: ReactionKind) -> bool {
        let user_id = reaction.user_id;
        let (same, opposite, delta) = match kind {
            ReactionKind::Like => (&mut self.likes, &mut self.dislikes, 1),
            ReactionKind::Dislike => (&mut self.dislikes, &mut self.likes, -1),
        };

        if let Some(idx) = same.iter().position(|r| r.user_id == user_id) {
            same.remove(idx);
            self.sort_by_likes -= delta;
            return false;
        }

        if let Some(idx) = opposite.iter().position(|r| r.user_id == user_id) {
            opposite.remove(idx);
            self.sort_by_likes += delta;
        }

        same.push(reaction);
        self.sort_by_likes += delta;
        true
    }

    pub fn stored_images(&self) -> Vec<StoredImage> {
        self.images
            .iter()
            .map(|image| StoredImage {
                path: image.path.to_stored(),
                position: image.position,
            })
            .collect()
    }
}

/// Image as returned to a client; `path` is null when the viewer may not see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageView {
    pub path: Option<String>,
    pub position: u32,
}

/// A wish as seen by one particular viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishView {
    pub id: i64,
    pub user_id: i64,
    pub material: bool,
    pub show: Show,
    pub name: Option<String>,
    pub price: Option<Amount>,
    pub currency: Option<Currency>,
    pub addresses: Vec<WishAddress>,
    pub description: String,
    pub executed: bool,
    pub images: Vec<ImageView>,
    pub booking: Option<Booking>,
    pub likes: Vec<Reaction>,
    pub dislikes: Vec<Reaction>,
    pub sort_by_likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WishView {
    pub fn build(wish: &Wish, access: Access, cipher: &Cipher) -> Result<Self, AppError> {
        let (name, price, currency, images) = if access.see_restricted {
            let content = wish.reveal(cipher)?;
            let images = content
                .images
                .into_iter()
                .map(|i| ImageView {
                    path: Some(i.path),
                    position: i.position,
                })
                .collect();
            (Some(content.name), content.price, content.currency, images)
        } else {
            let images = wish
                .images
                .iter()
                .map(|i| ImageView {
                    path: None,
                    position: i.position,
                })
                .collect();
            (None, None, None, images)
        };

        Ok(Self {
            id: wish.id,
            user_id: wish.user_id,
            material: wish.material,
            show: wish.show,
            name,
            price,
            currency,
            addresses: wish.addresses.clone(),
            description: wish.description.clone(),
            executed: wish.executed,
            images,
            booking: wish.booking.clone(),
            likes: wish.likes.clone(),
            dislikes: wish.dislikes.clone(),
            sort_by_likes: wish.sort_by_likes,
            created_at: wish.created_at,
            updated_at: wish.updated_at,
        })
    }
}

fn validate_wish_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Wish name cannot be blank".into());
        return Err(err);
    }
    if !NAME_RE.is_match(name) {
        let mut err = ValidationError::new("invalid_characters");
        err.message = Some("Wish name contains unsupported characters".into());
        return Err(err);
    }
    Ok(())
}

/// DTO for creating or updating a wish (the `data` part of the multipart form).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WishPayload {
    #[serde(default)]
    pub material: bool,

    #[serde(default)]
    pub show: Show,

    #[validate(
        length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"),
        custom(function = validate_wish_name)
    )]
    pub name: String,

    pub price: Option<String>,

    pub currency: Option<Currency>,

    #[serde(default)]
    #[validate(nested)]
    pub addresses: Vec<WishAddress>,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,
}

impl WishPayload {
    /// Validates and normalizes into plaintext content with the given images.
    pub fn into_content(self, images: Vec<ImageSlot>) -> Result<WishContent, AppError> {
        self.validate()?;
        if self.addresses.len() > MAX_ADDRESSES {
            return Err(AppError::BadRequest(format!(
                "At most {} addresses are allowed",
                MAX_ADDRESSES
            )));
        }

        let (price, currency) = if self.material {
            let price = self
                .price
                .as_deref()
                .ok_or_else(|| AppError::BadRequest("A material wish needs a price".to_string()))?;
            let currency = self.currency.ok_or_else(|| {
                AppError::BadRequest("A material wish needs a currency".to_string())
            })?;
            (Some(Amount::parse(price)?), Some(currency))
        } else {
            (None, None)
        };

        let addresses = self
            .addresses
            .into_iter()
            .enumerate()
            .map(|(idx, address)| WishAddress {
                id: if address.id.is_empty() {
                    (idx + 1).to_string()
                } else {
                    address.id
                },
                value: address.value.trim().to_string(),
            })
            .collect();

        Ok(WishContent {
            material: self.material,
            show: self.show,
            name: self.name.trim().to_string(),
            price,
            currency,
            addresses,
            description: self
                .description
                .map(|d| clean_html(d.trim()))
                .unwrap_or_default(),
            images,
        })
    }
}

/// A client-side directive for an image the client already knows about.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageDirectivePayload {
    pub path: String,
    #[serde(default)]
    pub delete: bool,
    pub position: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhoseWish {
    My,
    Someone,
}

#[derive(Debug, Deserialize)]
pub struct DoneRequest {
    pub whose: WhoseWish,
}
