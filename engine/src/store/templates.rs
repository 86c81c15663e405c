//! Built-in template set
//!
//! Templates are arranged by config domain, mirroring the on-disk
//! layout::
//!
//! ```text
//! proxy/nginx/main.conf
//! proxy/nginx/vhost.conf
//! supervisor/supervisor.conf
//! supervisor/project.conf
//! worker/wsgi.py
//! worker/uwsgi.ini
//! worker/fastcgi.sh
//! ```
//!
//! The registry is populated once at startup; target types that don't
//! need every file simply never reference the missing names.

use handlebars::Handlebars;

const NGINX_MAIN: &str = "\
# Generated by dockhand. Do not edit; changes are overwritten on deploy.
user {{user}};
worker_processes auto;
pid {{base}}/proxy/nginx.pid;
error_log {{base}}/proxy/error.log;

events {
    worker_connections 1024;
}

http {
    sendfile on;
    keepalive_timeout 65;
    access_log {{base}}/proxy/access.log;

    include {{base}}/config/*/vhost.conf;
}
";

const NGINX_VHOST: &str = "\
# Generated by dockhand for {{project}}. Do not edit.
server {
    listen {{port}};
    server_name {{domain}};

{{#each sections}}
{{#if this.worker}}
    location {{#if this.url}}{{this.url}}{{else}}/{{/if}} {
        proxy_pass http://127.0.0.1:{{this.port}};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    }
{{else}}
    location {{#if this.url}}{{this.url}}{{else}}/{{/if}} {
{{#if this.path}}
        alias {{this.path}};
{{/if}}
{{#if this.expires}}
        expires {{this.expires}};
{{/if}}
    }
{{/if}}
{{/each}}
}
";

const SUPERVISOR_MAIN: &str = "\
; Generated by dockhand. Do not edit.
[unix_http_server]
file={{base}}/supervisor/supervisor.sock

[supervisord]
logfile={{base}}/supervisor/supervisord.log
pidfile={{base}}/supervisor/supervisord.pid

[rpcinterface:supervisor]
supervisor.rpcinterface_factory = supervisor.rpcinterface:make_main_rpcinterface

[include]
files = {{base}}/config/*/supervisor.conf
";

const SUPERVISOR_PROJECT: &str = "\
; Generated by dockhand for {{project}}. Do not edit.
{{#each workers}}
[program:{{this.name}}]
command={{this.command}}
directory={{this.directory}}
user={{this.user}}
autostart=true
autorestart=true
redirect_stderr=true
stdout_logfile={{this.logfile}}

{{/each}}
[group:{{project}}]
programs={{programs}}
";

const WORKER_WSGI: &str = "\
#!/usr/bin/env python
# Generated startup script for {{name}}. Do not edit.

import sys

from gunicorn.app.wsgiapp import run

sys.argv = [
    'gunicorn',
    '--bind', '127.0.0.1:{{port}}',
    '--workers', '{{#if workers}}{{workers}}{{else}}2{{/if}}',
    '--name', '{{name}}',
    '{{#if module}}{{module}}{{else}}app:application{{/if}}',
]
run()
";

const WORKER_UWSGI: &str = "\
; Generated startup config for {{name}}. Do not edit.
[uwsgi]
socket = 127.0.0.1:{{port}}
module = {{#if module}}{{module}}{{else}}app:application{{/if}}
master = true
processes = {{#if workers}}{{workers}}{{else}}2{{/if}}
procname-prefix = {{name}}
vacuum = true
";

const WORKER_FASTCGI: &str = "\
#!/bin/sh
# Generated startup script for {{name}}. Do not edit.
exec {{#if command}}{{command}}{{else}}spawn-fcgi -n{{/if}} -p {{port}} -a 127.0.0.1
";

/// Build the engine's template registry.
pub fn default_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    // These render config files, not HTML.
    registry.register_escape_fn(handlebars::no_escape);

    for (name, template) in [
        ("proxy/nginx/main.conf", NGINX_MAIN),
        ("proxy/nginx/vhost.conf", NGINX_VHOST),
        ("supervisor/supervisor.conf", SUPERVISOR_MAIN),
        ("supervisor/project.conf", SUPERVISOR_PROJECT),
        ("worker/wsgi.py", WORKER_WSGI),
        ("worker/uwsgi.ini", WORKER_UWSGI),
        ("worker/fastcgi.sh", WORKER_FASTCGI),
    ] {
        registry
            .register_template_string(name, template)
            .expect("built-in template must parse");
    }

    registry
}
