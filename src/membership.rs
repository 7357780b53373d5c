//! Members and the borrowing limits of their tiers
use crate::error::{EntityKind, LendingError, LendingResult};
use crate::store::{Repository, Store};
use crate::utils::{Clock, Date, IdGenerator};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum MembershipTier {
    #[n(0)]
    Standard,
    #[n(1)]
    Premium,
    #[n(2)]
    Student,
    #[n(3)]
    Senior,
}

impl MembershipTier {
    pub const ALL: [MembershipTier; 4] = [
        MembershipTier::Standard,
        MembershipTier::Premium,
        MembershipTier::Student,
        MembershipTier::Senior,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipTier::Standard => "standard",
            MembershipTier::Premium => "premium",
            MembershipTier::Student => "student",
            MembershipTier::Senior => "senior",
        }
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipTier {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MembershipTier::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| LendingError::invalid(format!("unknown membership tier '{s}'")))
    }
}

/// Maximum simultaneous open loans per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLimits(BTreeMap<MembershipTier, u32>);

impl TierLimits {
    /// A table with no entries; every tier's limit is zero until set.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_limit(mut self, tier: MembershipTier, limit: u32) -> Self {
        self.0.insert(tier, limit);
        self
    }

    pub fn limit_for(&self, tier: MembershipTier) -> u32 {
        self.0.get(&tier).copied().unwrap_or(0)
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::empty()
            .with_limit(MembershipTier::Standard, 2)
            .with_limit(MembershipTier::Premium, 5)
            .with_limit(MembershipTier::Student, 3)
            .with_limit(MembershipTier::Senior, 2)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Member {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub phone: String,
    #[n(4)]
    pub address: String,
    #[n(5)]
    pub joined: Date,
    #[n(6)]
    pub tier: MembershipTier,
    #[n(7)]
    pub active: bool,
}

/// Registration form for a new member.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemberDetails {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    tier: Option<MembershipTier>,
}

impl MemberDetails {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
    pub fn set_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
    pub fn set_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }
    pub fn set_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }
    pub fn set_tier(mut self, tier: MembershipTier) -> Self {
        self.tier = Some(tier);
        self
    }

    fn finalise(self, id: String, joined: Date) -> LendingResult<Member> {
        let name = validate_name(self.name.as_deref().unwrap_or_default())?;
        let email = self.email.map(|e| e.trim().to_string()).unwrap_or_default();
        validate_email(&email)?;

        Ok(Member {
            id,
            name,
            email,
            phone: self.phone.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            joined,
            tier: self.tier.unwrap_or(MembershipTier::Standard),
            active: true,
        })
    }
}

fn validate_name(name: &str) -> LendingResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LendingError::invalid("name must not be empty"));
    }
    Ok(name.to_string())
}

fn validate_email(email: &str) -> LendingResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(LendingError::invalid(format!(
            "'{email}' is not an email address"
        ))),
    }
}

/// What the lending engine needs from the membership roster.
pub trait MemberDirectory {
    fn get(&self, id: &str) -> LendingResult<&Member>;
    fn borrow_limit(&self, tier: MembershipTier) -> u32;
}

pub struct Membership<S> {
    members: Repository<Member, S>,
    limits: TierLimits,
    clock: Rc<dyn Clock>,
    ids: Rc<dyn IdGenerator>,
}

impl<S: Store> Membership<S> {
    pub const COLLECTION: &'static str = "members";

    pub fn open(
        store: S,
        limits: TierLimits,
        clock: Rc<dyn Clock>,
        ids: Rc<dyn IdGenerator>,
    ) -> LendingResult<Self> {
        let members = Repository::open(store, Self::COLLECTION)?;
        Ok(Self {
            members,
            limits,
            clock,
            ids,
        })
    }

    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    /// Register a member. They join today and start out active.
    pub fn register(&mut self, details: MemberDetails) -> LendingResult<Member> {
        let id = self.ids.next_id(EntityKind::Member);
        let member = details.finalise(id, self.clock.today())?;
        self.members.put(member.id.clone(), member.clone())?;
        tracing::info!(member_id = %member.id, tier = %member.tier, "member registered");
        Ok(member)
    }

    /// Replace contact details, tier and active flag. The join date is kept.
    pub fn update(&mut self, member: Member) -> LendingResult<Member> {
        let joined = self.get(&member.id)?.joined;

        // same checks as registration
        let name = validate_name(&member.name)?;
        let email = member.email.trim().to_string();
        validate_email(&email)?;

        let updated = Member {
            name,
            email,
            joined,
            ..member
        };
        self.members.put(updated.id.clone(), updated.clone())?;
        tracing::info!(member_id = %updated.id, "member updated");
        Ok(updated)
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> LendingResult<Member> {
        let mut member = self.get(id)?.clone();
        member.active = active;
        self.members.put(member.id.clone(), member.clone())?;
        tracing::info!(member_id = %id, active, "member active flag changed");
        Ok(member)
    }

    pub fn remove(&mut self, id: &str) -> LendingResult<Member> {
        let removed = self
            .members
            .remove(id)?
            .ok_or_else(|| LendingError::not_found(EntityKind::Member, id))?;
        tracing::info!(member_id = %id, "member removed");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn all(&self) -> Vec<Member> {
        self.filtered(|_| true)
    }

    pub fn search_name(&self, query: &str) -> Vec<Member> {
        let query = query.to_lowercase();
        self.filtered(|m| m.name.to_lowercase().contains(&query))
    }

    pub fn search_email(&self, query: &str) -> Vec<Member> {
        let query = query.to_lowercase();
        self.filtered(|m| m.email.to_lowercase().contains(&query))
    }

    pub fn active(&self) -> Vec<Member> {
        self.filtered(|m| m.active)
    }

    pub fn by_tier(&self, tier: MembershipTier) -> Vec<Member> {
        self.filtered(|m| m.tier == tier)
    }

    fn filtered<P>(&self, predicate: P) -> Vec<Member>
    where
        P: Fn(&Member) -> bool,
    {
        let mut members: Vec<Member> = self
            .members
            .values()
            .filter(|m| predicate(*m))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        members
    }
}

impl<S: Store> MemberDirectory for Membership<S> {
    fn get(&self, id: &str) -> LendingResult<&Member> {
        self.members
            .get(id)
            .ok_or_else(|| LendingError::not_found(EntityKind::Member, id))
    }

    fn borrow_limit(&self, tier: MembershipTier) -> u32 {
        self.limits.limit_for(tier)
    }
}
