use casbin::prelude::DefaultModel;

// `p.dom` is stored but deliberately absent from the matcher: a role's grants
// apply in every domain where the role is assigned.
const MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.obj == p.obj && r.act == p.act
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}
