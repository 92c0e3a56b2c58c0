//! Integration tests for multi-entity statements.

#![allow(missing_docs)]

mod common;

use common::{AuditEntry, Building, Employee, Workstation, assert_sql_contains};
use omnia_crud::{
    BatchSelect, Dialect, Entity, EntityMapping, JoinKind, JoinedStatement, Mappings, SqlStatementJoin, property,
};

fn participant<E: Entity>(mappings: &Mappings) -> SqlStatementJoin {
    let registration = mappings.registration::<E>().unwrap();
    SqlStatementJoin::new(mappings.builder(&registration))
}

/// Two foreign keys to the same parent.
#[derive(Debug, Default)]
struct Transfer {
    id: i64,
    from_building_id: i32,
    to_building_id: i32,
}

impl Entity for Transfer {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new("Transfers")
            .property(property!(Transfer, id as "Id").primary_key())
            .property(property!(Transfer, from_building_id as "FromBuildingId"))
            .property(property!(Transfer, to_building_id as "ToBuildingId"))
            .belongs_to::<Building>("From", &["FromBuildingId"], |_, _| {})
            .belongs_to::<Building>("To", &["ToBuildingId"], |_, _| {})
    }
}

#[test]
fn three_entity_chain() {
    let mappings = Mappings::new(Dialect::MsSql);
    let statement = JoinedStatement::construct(
        participant::<Building>(&mappings),
        vec![participant::<Workstation>(&mappings), participant::<Employee>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap();

    assert_eq!(
        statement.from_clause(),
        "[Buildings] AS [Buildings] \
         LEFT OUTER JOIN [Workstations] AS [Workstations] ON [Workstations].[BuildingId]=[Buildings].[Id] \
         LEFT OUTER JOIN [Employees] AS [Employees] ON [Employees].[WorkstationId]=[Workstations].[WorkstationId]"
    );
    assert_sql_contains(
        statement.select_clause(),
        &[
            "Buildings.Id, Buildings.Name",
            "Workstations.WorkstationId, Workstations.Name, Workstations.BuildingId",
            "Employees.UserId, Employees.EmployeeId",
        ],
    );
    assert_eq!(statement.split_on(), "WorkstationId,UserId");
    assert_eq!(statement.root_alias(), "Buildings");

    let pairs = statement.participants()[2].column_pairs();
    assert_eq!(pairs, [("[Employees].[WorkstationId]".to_string(), "[Workstations].[WorkstationId]".to_string())]);
}

#[test]
fn inner_join_only_when_parent_is_certain() {
    let mappings = Mappings::new(Dialect::PostgreSql);

    // non-nullable foreign key on the root
    let statement = JoinedStatement::construct(
        participant::<Workstation>(&mappings).alias("w"),
        vec![participant::<Building>(&mappings).alias("b")],
        mappings.max_joins(),
    )
    .unwrap();
    assert_eq!(statement.participants()[1].join_kind(), JoinKind::Inner);
    assert_eq!(
        statement.from_clause(),
        r#""Workstations" AS "w" INNER JOIN "Buildings" AS "b" ON "w"."BuildingId"="b"."Id""#
    );

    // nullable foreign key, then a parent of an outer-joined child
    let statement = JoinedStatement::construct(
        participant::<Employee>(&mappings),
        vec![participant::<Workstation>(&mappings), participant::<Building>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap();
    let kinds = statement.participants().iter().skip(1).map(SqlStatementJoin::join_kind).collect::<Vec<_>>();
    assert_eq!(kinds, [JoinKind::LeftOuter, JoinKind::LeftOuter]);

    // explicit kinds win
    let statement = JoinedStatement::construct(
        participant::<Building>(&mappings),
        vec![participant::<Workstation>(&mappings).kind(JoinKind::Inner)],
        mappings.max_joins(),
    )
    .unwrap();
    assert_sql_contains(statement.from_clause(), &["Buildings AS Buildings INNER JOIN Workstations"]);
}

#[test]
fn missing_and_ambiguous_relationships() {
    let mappings = Mappings::new(Dialect::MsSql);

    let err = JoinedStatement::construct(
        participant::<Building>(&mappings),
        vec![participant::<AuditEntry>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no relationship found with Building"));

    let err = JoinedStatement::construct(
        participant::<Transfer>(&mappings),
        vec![participant::<Building>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("ambiguous relationship"));
}

#[test]
fn join_count_is_bounded() {
    let mappings = Mappings::new(Dialect::MsSql).with_max_joins(2);
    let err = JoinedStatement::construct(
        participant::<Building>(&mappings),
        vec![participant::<Workstation>(&mappings), participant::<Employee>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("at most 2"));
}

#[test]
fn aliases_must_be_unique() {
    let mappings = Mappings::new(Dialect::MsSql);
    let err = JoinedStatement::construct(
        participant::<Building>(&mappings).alias("x"),
        vec![participant::<Workstation>(&mappings).alias("x")],
        mappings.max_joins(),
    )
    .unwrap_err();
    assert!(matches!(err, omnia_crud::Error::InvalidArgument { .. }));
}

#[test]
fn legacy_paging_keeps_joined_columns_unique() {
    let mappings = Mappings::new(Dialect::MsSql2008);
    let statement = JoinedStatement::construct(
        participant::<Building>(&mappings),
        vec![participant::<Workstation>(&mappings)],
        mappings.max_joins(),
    )
    .unwrap();

    let root = mappings.builder(&mappings.registration::<Building>().unwrap());
    let sql = root
        .construct_full_batch_select_statement(&BatchSelect {
            select: Some(statement.select_clause()),
            from: Some(statement.from_clause()),
            order_clause: Some("[Buildings].[Id]"),
            skip: Some(0),
            limit: Some(2),
            ..BatchSelect::default()
        })
        .unwrap();

    assert_eq!(
        sql,
        "SELECT [__Column0] AS [Id], [__Column1] AS [Name], [__Column2] AS [WorkstationId], \
         [__Column3] AS [Name], [__Column4] AS [BuildingId] \
         FROM (SELECT ROW_NUMBER() OVER (ORDER BY [Buildings].[Id]) AS [__RowNumber], \
         [Buildings].[Id] AS [__Column0], [Buildings].[Name] AS [__Column1], \
         [Workstations].[WorkstationId] AS [__Column2], [Workstations].[Name] AS [__Column3], \
         [Workstations].[BuildingId] AS [__Column4] \
         FROM [Buildings] AS [Buildings] \
         LEFT OUTER JOIN [Workstations] AS [Workstations] ON [Workstations].[BuildingId]=[Buildings].[Id]) \
         AS [__Paged] WHERE [__RowNumber] BETWEEN 1 AND 2 ORDER BY [__RowNumber]"
    );
}
