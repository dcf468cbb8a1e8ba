use crate::{ArgMode, ArgumentInfo, Directive, Lang, ProcedureInfo, SpType};
use pl_session::{DbType, Value};

const BUILTIN_OWNER: &str = "public";
const DBMS_OUTPUT_CLASS: &str = "com.cubrid.plcsql.builtin.DBMS_OUTPUT";

/// The built-in DBMS_OUTPUT procedures, installed into every catalog.
pub fn builtin_procedures() -> Vec<ProcedureInfo> {
    use ArgMode::{In, Out};

    let system = |arg: ArgumentInfo| ArgumentInfo {
        is_system_generated: true,
        ..arg
    };

    vec![
        dbms_output(
            "enable",
            "enable(int)",
            // Oracle's default buffer size.
            vec![system(
                ArgumentInfo::new("s", DbType::Integer, In).with_default(Value::Integer(20000)),
            )],
        ),
        dbms_output("disable", "disable()", vec![]),
        dbms_output(
            "put",
            "put(java.lang.String)",
            vec![system(ArgumentInfo::new("str", DbType::String, In))],
        ),
        dbms_output(
            "put_line",
            "putLine(java.lang.String)",
            vec![system(ArgumentInfo::new("str", DbType::String, In))],
        ),
        dbms_output("new_line", "newLine()", vec![]),
        dbms_output(
            "get_line",
            "getLine(java.lang.String[], int[])",
            vec![
                system(ArgumentInfo::new("line", DbType::String, Out)),
                system(ArgumentInfo::new("status", DbType::Integer, Out)),
            ],
        ),
        dbms_output(
            "get_lines",
            "getLines(java.lang.String[], int[])",
            vec![
                system(ArgumentInfo::new("lines", DbType::String, Out)),
                system(ArgumentInfo::new("cnt", DbType::Integer, Out)),
            ],
        ),
    ]
}

fn dbms_output(name: &str, target_method: &str, args: Vec<ArgumentInfo>) -> ProcedureInfo {
    ProcedureInfo {
        unique_name: format!("{BUILTIN_OWNER}.dbms_output.{name}"),
        name: name.to_string(),
        pkg_name: Some("DBMS_OUTPUT".to_string()),
        sp_type: SpType::Procedure,
        return_type: DbType::Null,
        args,
        lang: Lang::PlCsql,
        target_class: DBMS_OUTPUT_CLASS.to_string(),
        target_method: target_method.to_string(),
        owner: BUILTIN_OWNER.to_string(),
        directive: Directive::RightsOwner,
        is_system_generated: true,
        comment: String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::builtin_procedures;

    #[test]
    fn test_builtins_validate() {
        let builtins = builtin_procedures();
        assert_eq!(builtins.len(), 7);

        let names: Vec<_> = builtins
            .into_iter()
            .map(|info| {
                let validated = info.validate().unwrap();
                let info = validated.info();
                assert_eq!(info.pkg_name.as_deref(), Some("dbms_output"));
                format!("{}/{}", info.unique_name, info.args.len())
            })
            .collect();

        insta::assert_snapshot!(names.join("\n"), @r###"
        public.dbms_output.enable/1
        public.dbms_output.disable/0
        public.dbms_output.put/1
        public.dbms_output.put_line/1
        public.dbms_output.new_line/0
        public.dbms_output.get_line/2
        public.dbms_output.get_lines/2
        "###);
    }
}
