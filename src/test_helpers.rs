use crate::domain::item::{
    IssueStatus, ItemId, Journal, Membership, Project, ProjectId, Relation, RelationKind, Role,
    RoleId, StatusId, Tracker, TrackerId, User, UserId, Version, VersionId, VersionSharing,
    VersionStatus, Watcher, WorkItem, WorkflowTransition,
};
use crate::storage::{InMemoryStore, Snapshot};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

pub(crate) fn item_ids(items: &[WorkItem]) -> Vec<u64> {
    items.iter().map(|i| i.id.get()).collect()
}

pub(crate) fn fixture() -> InMemoryStore {
    InMemoryStore::new(fixture_snapshot())
}

fn project(id: u64, identifier: &str, parent: Option<u64>, enabled: bool, trackers: &[u64]) -> Project {
    Project {
        id: ProjectId::new(id),
        identifier: identifier.to_string(),
        name: identifier.to_string(),
        parent_id: parent.map(ProjectId::new),
        board_enabled: enabled,
        tracker_ids: trackers.iter().copied().map(TrackerId::new).collect(),
    }
}

fn status(id: u64, name: &str, is_closed: bool) -> IssueStatus {
    IssueStatus {
        id: StatusId::new(id),
        name: name.to_string(),
        is_closed,
        position: id as u32,
    }
}

fn version(id: u64, project_id: u64, status: VersionStatus, sharing: VersionSharing, date: &str) -> Version {
    Version {
        id: VersionId::new(id),
        project_id: ProjectId::new(project_id),
        name: format!("v{}", id),
        status,
        sharing,
        effective_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
    }
}

fn item(id: u64, subject: &str, project_id: u64, tracker: u64, status: u64, author: u64) -> WorkItem {
    let mut item = WorkItem::new(
        ItemId::new(id),
        subject.to_string(),
        ProjectId::new(project_id),
        TrackerId::new(tracker),
        StatusId::new(status),
        UserId::new(author),
    );
    item.created_at = base_time() + Duration::hours(id as i64);
    item.updated_at = item.created_at;
    item
}

fn at(items: &mut [WorkItem], id: u64) -> &mut WorkItem {
    items
        .iter_mut()
        .find(|i| i.id == ItemId::new(id))
        .unwrap()
}

fn transitions(tracker: u64, pairs: &[(u64, u64)]) -> Vec<WorkflowTransition> {
    pairs
        .iter()
        .map(|(from, to)| WorkflowTransition {
            tracker_id: TrackerId::new(tracker),
            old_status_id: StatusId::new(*from),
            new_status_id: StatusId::new(*to),
        })
        .collect()
}

fn note(item_id: u64, user_id: u64, notes: &str, day: i64) -> Journal {
    Journal {
        id: Uuid::new_v4(),
        item_id: ItemId::new(item_id),
        user_id: UserId::new(user_id),
        notes: notes.to_string(),
        created_at: base_time() + Duration::days(day),
    }
}

/// Project 1 with sub-projects 3 (enabled), 4 (disabled) and grandchild 5;
/// project 2 is a separate board-enabled root
pub(crate) fn fixture_snapshot() -> Snapshot {
    let projects = vec![
        project(1, "ecookbook", None, true, &[1, 2, 3]),
        project(2, "onlinestore", None, true, &[3]),
        project(3, "subproject1", Some(1), true, &[1, 2, 3]),
        project(4, "subproject2", Some(1), false, &[1, 2]),
        project(5, "private-child", Some(3), true, &[1, 2]),
    ];

    let statuses = vec![
        status(1, "New", false),
        status(2, "Assigned", false),
        status(3, "Resolved", false),
        status(4, "Feedback", false),
        status(5, "Closed", true),
        status(6, "Rejected", true),
    ];

    let trackers = vec![
        Tracker { id: TrackerId::new(1), name: "Bug".to_string() },
        Tracker { id: TrackerId::new(2), name: "Feature request".to_string() },
        Tracker { id: TrackerId::new(3), name: "Support request".to_string() },
    ];

    let users = vec![
        User { id: UserId::new(1), name: "Redmine Admin".to_string(), admin: true },
        User { id: UserId::new(2), name: "John Smith".to_string(), admin: false },
        User { id: UserId::new(3), name: "Dave Lopper".to_string(), admin: false },
        User { id: UserId::new(4), name: "Robert Hill".to_string(), admin: false },
    ];

    let roles = vec![
        Role { id: RoleId::new(1), name: "Manager".to_string(), edit_issues: true },
        Role { id: RoleId::new(2), name: "Developer".to_string(), edit_issues: true },
        Role { id: RoleId::new(3), name: "Reporter".to_string(), edit_issues: false },
    ];

    let membership = |user: u64, project: u64, roles: &[u64]| Membership {
        user_id: UserId::new(user),
        project_id: ProjectId::new(project),
        role_ids: roles.iter().copied().map(RoleId::new).collect(),
    };
    let memberships = vec![
        membership(2, 1, &[1, 2]),
        membership(3, 1, &[2]),
        membership(2, 3, &[2]),
        membership(3, 3, &[3]),
        membership(2, 5, &[2]),
    ];

    let versions = vec![
        version(1, 1, VersionStatus::Closed, VersionSharing::None, "2023-12-01"),
        version(2, 1, VersionStatus::Open, VersionSharing::None, "2024-02-01"),
        version(3, 1, VersionStatus::Open, VersionSharing::Descendants, "2024-05-01"),
        version(4, 2, VersionStatus::Open, VersionSharing::None, "2023-01-01"),
        version(5, 3, VersionStatus::Open, VersionSharing::None, "2024-01-15"),
    ];

    let mut workflows = transitions(1, &[(1, 2), (1, 5), (2, 3), (2, 4), (3, 5), (4, 2)]);
    workflows.extend(transitions(2, &[(1, 2), (2, 3), (2, 6), (3, 5)]));
    workflows.extend(transitions(3, &[(1, 2), (2, 3)]));

    let mut items = vec![
        item(1, "Cannot print recipes", 1, 1, 1, 2),
        item(2, "Add ingredients categories", 1, 2, 2, 3),
        item(3, "Error 281 when updating a card", 1, 1, 1, 2),
        item(4, "Issue on subproject", 3, 1, 4, 2),
        item(5, "Subproject support question", 3, 3, 1, 2),
        item(6, "Issue in disabled subproject", 4, 1, 1, 2),
        item(7, "Sort the backlog", 1, 2, 3, 2),
        item(8, "Closed bug", 1, 1, 5, 2),
        item(9, "Online store question", 2, 3, 1, 3),
        item(10, "Grandchild project task", 5, 1, 1, 2),
        item(11, "Waiting on the printer fix", 1, 1, 1, 3),
        item(12, "Rejected blocker", 1, 2, 6, 2),
        item(13, "Subproject feature", 3, 2, 2, 3),
        item(14, "Private issue", 5, 1, 1, 2),
        item(15, "Sub-task of a bug", 1, 1, 1, 2),
        item(16, "Sub-task of a feature", 1, 2, 1, 2),
    ];
    at(&mut items, 1).fixed_version_id = Some(VersionId::new(1));
    at(&mut items, 1).position = Some(1);
    at(&mut items, 2).assigned_to_id = Some(UserId::new(2));
    at(&mut items, 2).position = Some(1);
    at(&mut items, 2).status_changed_at = Some(base_time() + Duration::days(2));
    at(&mut items, 3).assigned_to_id = Some(UserId::new(3));
    at(&mut items, 3).fixed_version_id = Some(VersionId::new(2));
    at(&mut items, 3).position = Some(2);
    at(&mut items, 7).fixed_version_id = Some(VersionId::new(3));
    at(&mut items, 13).assigned_to_id = Some(UserId::new(3));
    at(&mut items, 14).is_private = true;
    at(&mut items, 15).parent_id = Some(ItemId::new(1));
    at(&mut items, 16).parent_id = Some(ItemId::new(2));

    let relation = |kind: RelationKind, from: u64, to: u64| Relation {
        kind,
        issue_from: ItemId::new(from),
        issue_to: ItemId::new(to),
    };
    let relations = vec![
        relation(RelationKind::Relates, 1, 7),
        relation(RelationKind::Relates, 8, 1),
        relation(RelationKind::Blocks, 1, 11),
        relation(RelationKind::Blocks, 12, 2),
    ];

    let watchers = vec![
        Watcher { item_id: ItemId::new(1), user_id: UserId::new(2) },
        Watcher { item_id: ItemId::new(2), user_id: UserId::new(3) },
    ];

    let journals = vec![
        note(2, 1, "Looks good", 1),
        note(2, 3, "Ready for review", 2),
        note(2, 1, "", 3),
    ];

    Snapshot {
        projects,
        statuses,
        trackers,
        users,
        roles,
        memberships,
        versions,
        workflows,
        items,
        relations,
        watchers,
        journals,
    }
}
